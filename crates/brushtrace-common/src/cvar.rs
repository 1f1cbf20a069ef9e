// cvar.rs - named configuration variables

use crate::common::{com_dprintf, com_printf};

use std::collections::HashMap;

/// set to cause it to be saved to the host's config
pub const CVAR_ARCHIVE: i32 = 1;
/// don't allow change from the console at all
pub const CVAR_NOSET: i32 = 8;
/// save changes until the next map load
pub const CVAR_LATCH: i32 = 16;

/// A configuration variable: string value plus its parsed float.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub latched_string: Option<String>,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
}

#[derive(Debug, Clone, Default)]
pub struct CvarContext {
    vars: Vec<Cvar>,
    index: HashMap<String, usize>,
}

fn parse_value(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.index.get(name).map(|&idx| &self.vars[idx])
    }

    pub fn find_var_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        match self.index.get(name) {
            Some(&idx) => Some(&mut self.vars[idx]),
            None => None,
        }
    }

    /// Float value of a cvar, 0 if it does not exist.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |v| v.value)
    }

    /// String value of a cvar, "" if it does not exist.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |v| v.string.as_str())
    }

    /// Get or create. An existing variable keeps its value and gains `flags`.
    pub fn get(&mut self, name: &str, default: &str, flags: i32) -> &Cvar {
        let idx = match self.index.get(name) {
            Some(&idx) => {
                self.vars[idx].flags |= flags;
                idx
            }
            None => {
                let idx = self.vars.len();
                self.vars.push(Cvar {
                    name: name.to_string(),
                    string: default.to_string(),
                    latched_string: None,
                    flags,
                    modified: true,
                    value: parse_value(default),
                });
                self.index.insert(name.to_string(), idx);
                idx
            }
        };
        &self.vars[idx]
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.get(name, value, 0);
                return;
            }
        };
        let var = &mut self.vars[idx];

        if force {
            var.latched_string = None;
        } else {
            if var.flags & CVAR_NOSET != 0 {
                com_printf(&format!("{} is write protected.\n", name));
                return;
            }
            if var.flags & CVAR_LATCH != 0 {
                let current = var.latched_string.as_deref().unwrap_or(&var.string);
                if current != value {
                    com_printf(&format!("{} will be changed for next map.\n", name));
                    var.latched_string = Some(value.to_string());
                }
                return;
            }
        }

        if var.string == value {
            return;
        }
        var.modified = true;
        var.string = value.to_string();
        var.value = parse_value(value);
    }

    /// Set respecting `CVAR_NOSET` and `CVAR_LATCH`.
    pub fn set(&mut self, name: &str, value: &str) {
        self.set2(name, value, false);
    }

    /// Set ignoring protection flags.
    pub fn force_set(&mut self, name: &str, value: &str) {
        self.set2(name, value, true);
    }

    /// Applies all latched values. Called when a new map is loaded.
    pub fn get_latched_vars(&mut self) {
        for var in &mut self.vars {
            if let Some(latched) = var.latched_string.take() {
                com_dprintf(&format!("{} latched to {}\n", var.name, latched));
                var.value = parse_value(&latched);
                var.string = latched;
                var.modified = true;
            }
        }
    }
}
