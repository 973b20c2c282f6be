// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Configuration for the optimization pipeline
//!
//! Every switch defaults to on. The main use for turning them off is
//! debugging the optimizer itself: when an optimized computation misbehaves,
//! disabling switches one at a time shows which rewrite is responsible, and
//! `optimize = false` yields the plan exactly as compiled.

use serde::{Deserialize, Serialize};

/// Switches controlling which rewrites the optimizer applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptimizeOptions {
    /// Master switch; false leaves computations untouched
    pub optimize: bool,
    /// Consolidate the model-update phase of backprop (recurrent setups)
    pub consolidate_model_update: bool,
    /// Allow in-place propagation
    pub propagate_in_place: bool,
    /// Allow in-place backprop
    pub backprop_in_place: bool,
    /// Remove assignments made redundant by merging
    pub remove_assignments: bool,
    pub allow_left_merge: bool,
    pub allow_right_merge: bool,
    /// Avoid zeroing matrices that are fully written before being read
    pub initialize_undefined: bool,
    /// Allocate late and free early to reduce peak memory
    pub move_sizing_commands: bool,
    /// Hand freed storage directly to a same-sized allocation
    pub allocate_from_other: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            consolidate_model_update: true,
            propagate_in_place: true,
            backprop_in_place: true,
            remove_assignments: true,
            allow_left_merge: true,
            allow_right_merge: true,
            initialize_undefined: true,
            move_sizing_commands: true,
            allocate_from_other: true,
        }
    }
}

impl OptimizeOptions {
    /// Number of switches, including the master switch
    pub const NUM_FLAGS: usize = 10;

    /// Options that leave every computation exactly as compiled
    pub fn disabled() -> Self {
        Self {
            optimize: false,
            ..Default::default()
        }
    }

    /// Build options from the low bits of `mask`, in the order of [`OptimizeOptions::flags`]
    pub fn from_mask(mask: u16) -> Self {
        let bit = |i: usize| mask & (1 << i) != 0;
        Self {
            optimize: bit(0),
            consolidate_model_update: bit(1),
            propagate_in_place: bit(2),
            backprop_in_place: bit(3),
            remove_assignments: bit(4),
            allow_left_merge: bit(5),
            allow_right_merge: bit(6),
            initialize_undefined: bit(7),
            move_sizing_commands: bit(8),
            allocate_from_other: bit(9),
        }
    }

    /// Whether the variable-merging pass has anything to do
    pub fn merging_enabled(&self) -> bool {
        self.propagate_in_place || self.backprop_in_place || self.remove_assignments
    }

    /// Option names paired with their values
    pub fn flags(&self) -> [(&'static str, bool); Self::NUM_FLAGS] {
        [
            ("optimize", self.optimize),
            ("consolidate-model-update", self.consolidate_model_update),
            ("propagate-in-place", self.propagate_in_place),
            ("backprop-in-place", self.backprop_in_place),
            ("remove-assignments", self.remove_assignments),
            ("allow-left-merge", self.allow_left_merge),
            ("allow-right-merge", self.allow_right_merge),
            ("initialize-undefined", self.initialize_undefined),
            ("move-sizing-commands", self.move_sizing_commands),
            ("allocate-from-other", self.allocate_from_other),
        ]
    }

    /// Set a switch by its option name
    pub fn set(&mut self, name: &str, value: bool) -> Result<(), String> {
        let slot = match name {
            "optimize" => &mut self.optimize,
            "consolidate-model-update" => &mut self.consolidate_model_update,
            "propagate-in-place" => &mut self.propagate_in_place,
            "backprop-in-place" => &mut self.backprop_in_place,
            "remove-assignments" => &mut self.remove_assignments,
            "allow-left-merge" => &mut self.allow_left_merge,
            "allow-right-merge" => &mut self.allow_right_merge,
            "initialize-undefined" => &mut self.initialize_undefined,
            "move-sizing-commands" => &mut self.move_sizing_commands,
            "allocate-from-other" => &mut self.allocate_from_other,
            other => return Err(format!("Unknown optimization option '{other}'")),
        };
        *slot = value;
        Ok(())
    }

    /// Parse options from JSON; missing switches keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything() {
        let options = OptimizeOptions::default();
        assert!(options.flags().iter().all(|(_, value)| *value));
        assert_eq!(OptimizeOptions::from_mask(0x3ff), options);
    }

    #[test]
    fn test_disabled_only_clears_master_switch() {
        let options = OptimizeOptions::disabled();
        assert!(!options.optimize);
        assert_eq!(options.flags().iter().filter(|(_, value)| *value).count(), OptimizeOptions::NUM_FLAGS - 1);
    }

    #[test]
    fn test_mask_follows_flag_order() {
        for i in 0..OptimizeOptions::NUM_FLAGS {
            let options = OptimizeOptions::from_mask(1 << i);
            let flags = options.flags();
            for (j, (name, value)) in flags.iter().enumerate() {
                assert_eq!(*value, i == j, "flag {name} with mask bit {i}");
            }
        }
    }

    #[test]
    fn test_set_by_name() {
        let mut options = OptimizeOptions::default();
        options.set("allow-right-merge", false).unwrap();
        assert!(!options.allow_right_merge);
        assert!(options.allow_left_merge);
        assert!(options.set("no-such-option", false).is_err());
    }

    #[test]
    fn test_merging_gate() {
        let mut options = OptimizeOptions::default();
        options.propagate_in_place = false;
        options.backprop_in_place = false;
        assert!(options.merging_enabled());
        options.remove_assignments = false;
        assert!(!options.merging_enabled());
    }

    #[test]
    fn test_json_uses_option_names() {
        let options = OptimizeOptions::from_json(r#"{"move-sizing-commands": false}"#).unwrap();
        assert!(!options.move_sizing_commands);
        assert!(options.allocate_from_other);
        let json = serde_json::to_value(OptimizeOptions::default()).unwrap();
        assert_eq!(json["initialize-undefined"], true);
    }
}
