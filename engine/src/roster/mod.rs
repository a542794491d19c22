//! Dispatch list (roster) loading and lookups.
//!
//! The dispatch list is the authoritative mapping from school code to
//! school name, teacher user ids and contact addresses. Loading fails fast
//! when one code carries more than one name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::config::RosterColumns;
use crate::error::{RosterError, RosterResult, SchoolNameConflict};
use crate::models::{Cell, Table};
use crate::parser::read_table;

static ADDRESS_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,;]+").unwrap());

/// One deduplicated dispatch list row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RosterEntry {
    pub school_id: String,
    pub school_name: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub tl_email: Option<String>,
}

impl RosterEntry {
    /// Teacher address, falling back to the teacher leader's.
    pub fn contact(&self) -> Option<&str> {
        self.email.as_deref().or(self.tl_email.as_deref())
    }
}

/// Mailing details for one school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailingInfo {
    pub school_id: String,
    /// One label per matching roster row.
    pub school_labels: Vec<String>,
    /// One comma-separated address list per matching roster row.
    pub mailing_list: Vec<String>,
}

/// Loaded and checked dispatch list.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    schools: BTreeMap<String, Option<String>>,
}

impl Roster {
    /// Read and check a dispatch list file.
    pub fn load(path: &Path, columns: &RosterColumns) -> RosterResult<Self> {
        let table = read_table(path)?;
        Self::from_table(&table, columns)
    }

    /// Build from an already parsed table.
    ///
    /// Exact duplicate rows are removed and rows without a school code are
    /// skipped. Fails with [`RosterError::DuplicateSchoolNames`] listing only
    /// the codes that map to more than one name.
    pub fn from_table(table: &Table, columns: &RosterColumns) -> RosterResult<Self> {
        let required = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| RosterError::MissingColumn(name.to_string()))
        };
        let id_idx = required(&columns.school_id)?;
        let name_idx = required(&columns.school_name)?;
        let user_idx = table.column_index(&columns.user_id);
        let email_idx = table.column_index(&columns.email);
        let tl_idx = table.column_index(&columns.tl_email);

        let pick = |row: &[Cell], idx: Option<usize>| idx.and_then(|i| row[i].clone());

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for row in &table.rows {
            let Some(school_id) = row[id_idx].clone() else {
                continue;
            };
            let entry = RosterEntry {
                school_id,
                school_name: row[name_idx].clone(),
                user_id: pick(row, user_idx),
                email: pick(row, email_idx),
                tl_email: pick(row, tl_idx),
            };
            if seen.insert(entry.clone()) {
                entries.push(entry);
            }
        }

        let schools = unique_schools(&entries)?;
        Ok(Self { entries, schools })
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// School code to canonical name.
    pub fn schools(&self) -> &BTreeMap<String, Option<String>> {
        &self.schools
    }

    pub fn school_count(&self) -> usize {
        self.schools.len()
    }

    pub fn contains_school(&self, school_id: &str) -> bool {
        self.schools.contains_key(school_id)
    }

    pub fn school_name(&self, school_id: &str) -> Option<&str> {
        self.schools.get(school_id).and_then(|n| n.as_deref())
    }

    /// Rows listing `user_id`.
    pub fn entries_for_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> impl Iterator<Item = &'a RosterEntry> {
        self.entries
            .iter()
            .filter(move |e| e.user_id.as_deref() == Some(user_id))
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.entries_for_user(user_id).next().is_some()
    }

    /// Labels and addresses used to send a school its report.
    pub fn mailing_info(&self, school_id: &str) -> RosterResult<MailingInfo> {
        let rows: Vec<&RosterEntry> = self
            .entries
            .iter()
            .filter(|e| e.school_id == school_id)
            .collect();
        if rows.is_empty() {
            return Err(RosterError::SchoolNotFound(school_id.to_string()));
        }

        let missing: Vec<String> = rows
            .iter()
            .filter(|e| e.contact().is_none())
            .map(|e| e.school_id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(RosterError::MissingContact(missing));
        }

        let labels: BTreeSet<Option<&str>> =
            rows.iter().map(|e| e.school_name.as_deref()).collect();
        if labels.len() > 1 {
            return Err(RosterError::AmbiguousLabel(school_id.to_string()));
        }

        Ok(MailingInfo {
            school_id: school_id.to_string(),
            school_labels: rows
                .iter()
                .map(|e| e.school_name.clone().unwrap_or_default())
                .collect(),
            mailing_list: rows
                .iter()
                .filter_map(|e| e.contact())
                .map(normalise_addresses)
                .collect(),
        })
    }
}

/// One code, one name. Blank names do not count as a distinct name.
fn unique_schools(entries: &[RosterEntry]) -> RosterResult<BTreeMap<String, Option<String>>> {
    let mut names: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for entry in entries {
        let set = names.entry(entry.school_id.as_str()).or_default();
        if let Some(name) = entry.school_name.as_deref() {
            set.insert(name);
        }
    }

    let conflicts: Vec<SchoolNameConflict> = names
        .iter()
        .filter(|(_, n)| n.len() > 1)
        .map(|(id, n)| SchoolNameConflict {
            school_id: id.to_string(),
            names: n.iter().map(|s| s.to_string()).collect(),
        })
        .collect();
    if !conflicts.is_empty() {
        return Err(RosterError::DuplicateSchoolNames(conflicts));
    }

    Ok(names
        .into_iter()
        .map(|(id, n)| (id.to_string(), n.into_iter().next().map(str::to_string)))
        .collect())
}

/// `"a@x.org b@x.org"` becomes `"a@x.org,b@x.org"`.
fn normalise_addresses(raw: &str) -> String {
    ADDRESS_SEPARATORS
        .split(raw.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    const HEADER: &str = "School Label,RRED School ID,UserID,Email,TL Email\n";

    fn roster(body: &str) -> RosterResult<Roster> {
        let table = parse_str(&format!("{HEADER}{body}"), ',').unwrap();
        Roster::from_table(&table, &RosterColumns::default())
    }

    #[test]
    fn test_duplicate_names_fail_with_offending_codes_only() {
        let err = roster(
            "Lime School,RRS180,T1,a@x.org,\n\
             Lime Primary,RRS180,T2,b@x.org,\n\
             Oak School,RRS101,T3,c@x.org,\n\
             Oak School,RRS101,T4,d@x.org,\n",
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("RRS180"));
        assert!(!msg.contains("RRS101"));
        assert_eq!(err.school_ids(), vec!["RRS180"]);
    }

    #[test]
    fn test_exact_duplicates_removed() {
        let r = roster(
            "Oak School,RRS101,T3,c@x.org,\n\
             Oak School,RRS101,T3,c@x.org,\n\
             Elm School,RRS102,T5,,tl@x.org\n",
        )
        .unwrap();
        assert_eq!(r.entries().len(), 2);
        assert_eq!(r.school_count(), 2);
        assert_eq!(r.school_name("RRS101"), Some("Oak School"));
        assert!(r.contains_user("T5"));
        assert!(!r.contains_user("T9"));
    }

    #[test]
    fn test_missing_required_column() {
        let table = parse_str("Name,Code\nOak,RRS1\n", ',').unwrap();
        assert!(matches!(
            Roster::from_table(&table, &RosterColumns::default()),
            Err(RosterError::MissingColumn(c)) if c == "RRED School ID"
        ));
    }

    #[test]
    fn test_mailing_info_falls_back_to_leader_address() {
        let r = roster(
            "Oak School,RRS101,T3,c@x.org d@x.org,\n\
             Oak School,RRS101,T4,,tl@x.org\n",
        )
        .unwrap();
        let info = r.mailing_info("RRS101").unwrap();
        assert_eq!(info.school_labels, vec!["Oak School", "Oak School"]);
        assert_eq!(info.mailing_list, vec!["c@x.org,d@x.org", "tl@x.org"]);
    }

    #[test]
    fn test_mailing_info_errors() {
        let r = roster(
            "Oak School,RRS101,T3,,\n\
             Elm School,RRS102,T5,e@x.org,\n",
        )
        .unwrap();
        assert!(matches!(
            r.mailing_info("RRS999"),
            Err(RosterError::SchoolNotFound(_))
        ));
        assert!(matches!(
            r.mailing_info("RRS101"),
            Err(RosterError::MissingContact(ids)) if ids == vec!["RRS101"]
        ));
    }

    #[test]
    fn test_mailing_info_ambiguous_label() {
        let r = roster(
            "Oak School,RRS101,T3,c@x.org,\n\
             ,RRS101,T4,d@x.org,\n",
        )
        .unwrap();
        assert!(matches!(
            r.mailing_info("RRS101"),
            Err(RosterError::AmbiguousLabel(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.csv");
        std::fs::write(&path, format!("{HEADER}Oak School,RRS101,T3,c@x.org,\n")).unwrap();
        let r = Roster::load(&path, &RosterColumns::default()).unwrap();
        assert!(r.contains_school("RRS101"));
    }
}
