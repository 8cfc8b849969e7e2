//! Solutions: named groups of notes applied together.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, TuneError};
use crate::note::{cpu, hana, paging};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionCatalog {
    solutions: BTreeMap<String, Vec<String>>,
}

impl Default for SolutionCatalog {
    fn default() -> Self {
        SolutionCatalog::new(&BTreeMap::new())
    }
}

impl SolutionCatalog {
    /// Built-in solutions, extended or replaced by `extra`.
    pub fn new(extra: &BTreeMap<String, Vec<String>>) -> Self {
        let mut solutions = BTreeMap::new();
        solutions.insert(
            "HANA".to_string(),
            vec![hana::ID.to_string(), cpu::ID.to_string(), paging::ID.to_string()],
        );
        solutions.insert(
            "NETWEAVER".to_string(),
            vec![paging::ID.to_string(), cpu::ID.to_string()],
        );
        for (name, notes) in extra {
            debug!(solution = name.as_str(), "solution defined in settings");
            solutions.insert(name.clone(), notes.clone());
        }
        SolutionCatalog { solutions }
    }

    pub fn names(&self) -> Vec<&str> {
        self.solutions.keys().map(|s| s.as_str()).collect()
    }

    /// Note IDs of `name`, in apply order.
    pub fn notes(&self, name: &str) -> Result<&[String]> {
        self.solutions
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| TuneError::UnknownSolution(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.solutions
            .iter()
            .map(|(name, notes)| (name.as_str(), notes.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_solutions() {
        let catalog = SolutionCatalog::default();
        assert_eq!(catalog.names(), vec!["HANA", "NETWEAVER"]);
        assert_eq!(catalog.notes("HANA").unwrap(), &["2205917", "2684254", "1557506"]);
        assert_eq!(catalog.notes("NETWEAVER").unwrap(), &["1557506", "2684254"]);
    }

    #[test]
    fn settings_add_and_replace() {
        let extra = BTreeMap::from([
            ("NETWEAVER".to_string(), vec!["1557506".to_string()]),
            ("DB".to_string(), vec!["db-host".to_string()]),
        ]);
        let catalog = SolutionCatalog::new(&extra);
        assert_eq!(catalog.names(), vec!["DB", "HANA", "NETWEAVER"]);
        assert_eq!(catalog.notes("NETWEAVER").unwrap(), &["1557506"]);
    }

    #[test]
    fn unknown_solution() {
        let err = SolutionCatalog::default().notes("S4").unwrap_err();
        assert!(matches!(err, TuneError::UnknownSolution(ref s) if s == "S4"));
    }
}
