//! The option store (C2): an in-memory model of a packet's options across
//! multiple namespaced "universes", with lookup and the `default` /
//! `supersede` / `append` / `prepend` set-semantics configuration
//! statements use.
//!
//! The original engine dispatches lookup/save/delete/encapsulate through a
//! function-pointer table on a `Universe` struct so the agent universe
//! (list-shaped) and the hashed universes share one abstract interface (§9).
//! This rewrite uses a closed `Universe` enum plus a single hashed backing
//! map per universe — Rust's enum exhaustiveness plays the same "one
//! abstract operation set, several shapes" role the function-pointer table
//! played, without the indirection.

use std::collections::HashMap;

/// An option namespace. `Agent` is list-shaped in the original engine (it
/// allows repeated sub-codes, threaded as a linked list); every other
/// universe is "at most one `OptionCache` per `(universe, code)`" per §3.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Universe {
    Dhcp,
    Server,
    Agent,
    Vendor,
    Site,
}

/// How a configuration statement combines with whatever's already at
/// `(universe, code)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetOp {
    Default,
    Supersede,
    Append,
    Prepend,
}

/// A materialised option value. The original keeps a raw byte-string
/// alongside an optional unevaluated expression and an `OptionDef` pointer
/// (name/code/format). Once a statement has been executed by `scope.rs` the
/// value here is always the evaluated byte-string; the expression tree that
/// produced it lives in `model::OptionStatement`, not here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionCache {
    pub data: Vec<u8>,
}

/// Namespaced option set: `(universe, code) -> OptionCache`, one hashed
/// table per universe. `spec.md §4.2`'s 17-bucket mixer is an
/// implementation detail of the original C hash table; any deterministic
/// hash is explicitly declared sufficient (§9), so this just uses
/// `HashMap`'s default hasher.
#[derive(Clone, Debug, Default)]
pub struct OptionState {
    dhcp: HashMap<u8, OptionCache>,
    server: HashMap<u8, OptionCache>,
    vendor: HashMap<u8, OptionCache>,
    site: HashMap<u8, OptionCache>,
    /// List-shaped: multiple sub-options with the same code are kept
    /// distinct entries, appended in arrival order, as RFC 3046 sub-TLVs.
    agent: Vec<(u8, Vec<u8>)>,
}

impl OptionState {
    fn table(&self, universe: Universe) -> Option<&HashMap<u8, OptionCache>> {
        match universe {
            Universe::Dhcp => Some(&self.dhcp),
            Universe::Server => Some(&self.server),
            Universe::Vendor => Some(&self.vendor),
            Universe::Site => Some(&self.site),
            Universe::Agent => None,
        }
    }

    fn table_mut(&mut self, universe: Universe) -> Option<&mut HashMap<u8, OptionCache>> {
        match universe {
            Universe::Dhcp => Some(&mut self.dhcp),
            Universe::Server => Some(&mut self.server),
            Universe::Vendor => Some(&mut self.vendor),
            Universe::Site => Some(&mut self.site),
            Universe::Agent => None,
        }
    }

    pub fn get(&self, universe: Universe, code: u8) -> Option<&[u8]> {
        if universe == Universe::Agent {
            return self.agent.iter().rev().find(|(c, _)| *c == code).map(|(_, d)| d.as_slice());
        }

        self.table(universe)?.get(&code).map(|c| c.data.as_slice())
    }

    pub fn iter_codes(&self, universe: Universe) -> Vec<u8> {
        if universe == Universe::Agent {
            let mut codes: Vec<u8> = self.agent.iter().map(|(c, _)| *c).collect();
            codes.dedup();
            return codes;
        }

        self.table(universe)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// `default`: only save if nothing is already present.
    pub fn default(&mut self, universe: Universe, code: u8, value: Vec<u8>) {
        if universe == Universe::Agent {
            if !self.agent.iter().any(|(c, _)| *c == code) {
                self.agent.push((code, value));
            }
            return;
        }

        self.table_mut(universe)
            .expect("non-agent universe")
            .entry(code)
            .or_insert(OptionCache { data: value });
    }

    /// `supersede`: unconditional replace.
    pub fn supersede(&mut self, universe: Universe, code: u8, value: Vec<u8>) {
        if universe == Universe::Agent {
            self.agent.retain(|(c, _)| *c != code);
            self.agent.push((code, value));
            return;
        }

        self.table_mut(universe)
            .expect("non-agent universe")
            .insert(code, OptionCache { data: value });
    }

    /// `append`: concatenate new data after existing. Promotes a
    /// constant-valued entry to a concatenation, per §9's "coerced
    /// expression promotion" note — in this byte-oriented rewrite that's
    /// simply extending the `Vec<u8>`.
    pub fn append(&mut self, universe: Universe, code: u8, value: Vec<u8>) {
        if universe == Universe::Agent {
            self.agent.push((code, value));
            return;
        }

        let table = self.table_mut(universe).expect("non-agent universe");
        match table.get_mut(&code) {
            Some(existing) => existing.data.extend(value),
            None => {
                table.insert(code, OptionCache { data: value });
            }
        }
    }

    /// `prepend`: concatenate new data before existing.
    pub fn prepend(&mut self, universe: Universe, code: u8, value: Vec<u8>) {
        if universe == Universe::Agent {
            self.agent.insert(0, (code, value));
            return;
        }

        let table = self.table_mut(universe).expect("non-agent universe");
        match table.get_mut(&code) {
            Some(existing) => {
                let mut merged = value;
                merged.extend(existing.data.drain(..));
                existing.data = merged;
            }
            None => {
                table.insert(code, OptionCache { data: value });
            }
        }
    }

    pub fn remove(&mut self, universe: Universe, code: u8) {
        if universe == Universe::Agent {
            self.agent.retain(|(c, _)| *c != code);
            return;
        }

        if let Some(table) = self.table_mut(universe) {
            table.remove(&code);
        }
    }

    pub fn set_agent_options(&mut self, options: &crate::model::AgentOptions) {
        self.agent = options.0.iter().map(|o| (o.code, o.data.clone())).collect();
    }

    pub fn agent_entries(&self) -> &[(u8, Vec<u8>)] {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_does_not_overwrite_existing() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, 1, vec![1, 2, 3]);
        opts.default(Universe::Dhcp, 1, vec![9, 9, 9]);

        assert_eq!(opts.get(Universe::Dhcp, 1), Some([1u8, 2, 3].as_slice()));
    }

    #[test]
    fn append_concatenates_after_existing() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, 6, vec![10, 0, 0, 1]);
        opts.append(Universe::Dhcp, 6, vec![10, 0, 0, 2]);

        assert_eq!(
            opts.get(Universe::Dhcp, 6),
            Some([10u8, 0, 0, 1, 10, 0, 0, 2].as_slice())
        );
    }

    #[test]
    fn prepend_concatenates_before_existing() {
        let mut opts = OptionState::default();
        opts.supersede(Universe::Dhcp, 6, vec![10, 0, 0, 2]);
        opts.prepend(Universe::Dhcp, 6, vec![10, 0, 0, 1]);

        assert_eq!(
            opts.get(Universe::Dhcp, 6),
            Some([10u8, 0, 0, 1, 10, 0, 0, 2].as_slice())
        );
    }

    #[test]
    fn agent_universe_keeps_repeated_codes_distinct() {
        let mut opts = OptionState::default();
        opts.append(Universe::Agent, 1, vec![b'a']);
        opts.append(Universe::Agent, 1, vec![b'b']);

        assert_eq!(opts.agent_entries().len(), 2);
        assert_eq!(opts.get(Universe::Agent, 1), Some([b'b'].as_slice()));
    }
}
