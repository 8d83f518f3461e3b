//! Role matrix export.
//!
//! Anything exposing [`RoleTable`] can be written out as comma separated text: a header row
//! of a blank cell followed by the database names, one row per user, then a blank line.

use std::fs;
use std::path::Path;

use crate::actions::{role_label, Role};
use crate::error::AppResult;
use crate::model::RoleMatrix;

/// Read-only grid view of users (rows) by databases (columns).
pub trait RoleTable {
    fn column_headers(&self) -> &[String];
    fn row_headers(&self) -> &[String];
    fn cell(&self, row: usize, col: usize) -> Option<Role>;

    /// Rows as rendered strings, null cells shown as `-`.
    fn rendered_rows(&self) -> Vec<Vec<String>> {
        (0..self.row_headers().len())
            .map(|r| (0..self.column_headers().len()).map(|c| role_label(self.cell(r, c)).to_string()).collect())
            .collect()
    }
}

impl RoleTable for RoleMatrix {
    fn column_headers(&self) -> &[String] { self.databases() }
    fn row_headers(&self) -> &[String] { self.users() }
    fn cell(&self, row: usize, col: usize) -> Option<Role> { RoleMatrix::cell(self, row, col) }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn to_csv<T: RoleTable + ?Sized>(table: &T) -> String {
    let mut out = String::new();
    let header: Vec<String> = std::iter::once(String::new()).chain(table.column_headers().iter().map(|d| csv_field(d))).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for (user, cells) in table.row_headers().iter().zip(table.rendered_rows()) {
        let row: Vec<String> = std::iter::once(csv_field(user)).chain(cells).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out.push('\n');
    out
}

pub fn write_csv<T: RoleTable + ?Sized>(table: &T, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_csv(table))?;
    tracing::info!(target: "mongoadmin::report", "role table written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table() -> RoleMatrix {
        let mut m = RoleMatrix::new(vec!["alice".into(), "bob".into()], vec!["sales".into(), "hr".into()]);
        m.set_role("alice", "sales", Some(Role::Read));
        m.set_role("bob", "hr", Some(Role::ReadWrite));
        m
    }

    #[test]
    fn csv_has_blank_corner_and_trailing_blank_line() {
        assert_eq!(to_csv(&table()), ",sales,hr\nalice,read,-\nbob,-,readWrite\n\n");
    }

    #[test]
    fn csv_of_empty_table_is_just_the_corner() {
        assert_eq!(to_csv(&RoleMatrix::default()), "\n\n");
    }

    #[test]
    fn odd_names_are_quoted() {
        let m = RoleMatrix::new(vec!["o\"neil".into()], vec!["a,b".into()]);
        assert_eq!(to_csv(&m), ",\"a,b\"\n\"o\"\"neil\",-\n\n");
    }

    #[test]
    fn write_csv_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/UsersAndRoles.csv");
        write_csv(&table(), &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), to_csv(&table()));
    }
}
