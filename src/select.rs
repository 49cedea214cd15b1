/// Declarative selection directive used across the managers.
///
/// Callers pass string sentinels (`"update_all"`, `"intersect_all"`,
/// `"all_hazards"`, `"build_all"`, `"collect_all"`) to mean "all known";
/// an absent list means "none"; anything else is an explicit allow-list.
/// Unknown names in an allow-list are the receiving manager's problem to
/// warn about and skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    None,
    All,
    Named(Vec<String>),
}

impl Selection {
    /// Interpret an optional name list against its "all" sentinel.
    pub fn from_directive(names: Option<&[String]>, sentinel: &str) -> Self {
        match names {
            None => Self::None,
            Some(list) if list.iter().any(|n| n == sentinel) => Self::All,
            Some(list) => Self::Named(list.to_vec()),
        }
    }

    /// Resolve against the known name set. `None` resolves empty; the
    /// caller is responsible for logging unknown names it skips.
    pub fn resolve<'a, I>(&self, known: I) -> Vec<String>
    where
        I: Iterator<Item = &'a String>,
    {
        match self {
            Self::None => Vec::new(),
            Self::All => known.cloned().collect(),
            Self::Named(list) => list.clone(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_selects_all() {
        let names = vec!["sites".to_string(), "intersect_all".to_string()];
        let selection = Selection::from_directive(Some(&names), "intersect_all");
        assert_eq!(selection, Selection::All);
    }

    #[test]
    fn absent_selects_none() {
        assert_eq!(Selection::from_directive(None, "update_all"), Selection::None);
    }

    #[test]
    fn explicit_list_passes_through() {
        let names = vec!["sites".to_string()];
        let selection = Selection::from_directive(Some(&names), "intersect_all");
        assert_eq!(selection, Selection::Named(names.clone()));
        let known = ["sites".to_string(), "parcels".to_string()];
        assert_eq!(selection.resolve(known.iter()), names);
    }
}
