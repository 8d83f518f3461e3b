use crate::actions::Role;

/// Users x databases grid of role grants. Every row always has one cell per database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMatrix {
    users: Vec<String>,
    databases: Vec<String>,
    cells: Vec<Vec<Option<Role>>>,
}

impl RoleMatrix {
    pub fn new(users: Vec<String>, databases: Vec<String>) -> Self {
        let cells = vec![vec![None; databases.len()]; users.len()];
        Self { users, databases, cells }
    }

    pub fn users(&self) -> &[String] { &self.users }
    pub fn databases(&self) -> &[String] { &self.databases }

    pub fn user_index(&self, user: &str) -> Option<usize> { self.users.iter().position(|u| u == user) }
    pub fn database_index(&self, db: &str) -> Option<usize> { self.databases.iter().position(|d| d == db) }

    pub fn contains_user(&self, user: &str) -> bool { self.user_index(user).is_some() }
    pub fn contains_database(&self, db: &str) -> bool { self.database_index(db).is_some() }

    pub fn cell(&self, row: usize, col: usize) -> Option<Role> {
        self.cells.get(row).and_then(|r| r.get(col)).copied().flatten()
    }

    /// Current grant; `None` for the null-role and for unknown coordinates.
    pub fn role(&self, user: &str, db: &str) -> Option<Role> {
        match (self.user_index(user), self.database_index(db)) {
            (Some(r), Some(c)) => self.cell(r, c),
            _ => None,
        }
    }

    /// Overwrite one cell; `false` when the user or database is unknown.
    pub fn set_role(&mut self, user: &str, db: &str, role: Option<Role>) -> bool {
        match (self.user_index(user), self.database_index(db)) {
            (Some(r), Some(c)) => {
                self.cells[r][c] = role;
                true
            }
            _ => false,
        }
    }

    pub fn push_user(&mut self, user: impl Into<String>) {
        self.users.push(user.into());
        self.cells.push(vec![None; self.databases.len()]);
    }

    pub fn remove_user(&mut self, user: &str) -> bool {
        match self.user_index(user) {
            Some(r) => {
                self.users.remove(r);
                self.cells.remove(r);
                true
            }
            None => false,
        }
    }

    pub fn push_database(&mut self, db: impl Into<String>) {
        self.databases.push(db.into());
        for row in &mut self.cells { row.push(None); }
    }

    pub fn remove_database(&mut self, db: &str) -> bool {
        match self.database_index(db) {
            Some(c) => {
                self.databases.remove(c);
                for row in &mut self.cells { row.remove(c); }
                true
            }
            None => false,
        }
    }

    /// Non-null grants in one database column, in user order.
    pub fn column_grants(&self, db: &str) -> Vec<(String, Role)> {
        let Some(c) = self.database_index(db) else { return Vec::new() };
        self.users
            .iter()
            .zip(&self.cells)
            .filter_map(|(u, row)| row[c].map(|role| (u.clone(), role)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> RoleMatrix {
        let mut m = RoleMatrix::new(vec!["alice".into(), "bob".into()], vec!["sales".into(), "hr".into()]);
        m.set_role("alice", "sales", Some(Role::Read));
        m.set_role("bob", "hr", Some(Role::ReadWrite));
        m
    }

    #[test]
    fn new_matrix_is_all_null() {
        let m = RoleMatrix::new(vec!["a".into()], vec!["x".into(), "y".into()]);
        assert_eq!(m.cell(0, 0), None);
        assert_eq!(m.cell(0, 1), None);
        assert_eq!(m.cell(5, 5), None);
    }

    #[test]
    fn removing_a_database_drops_one_cell_per_row() {
        let mut m = matrix();
        assert!(m.remove_database("sales"));
        assert_eq!(m.databases(), ["hr"]);
        assert_eq!(m.role("bob", "hr"), Some(Role::ReadWrite));
        assert_eq!(m.role("alice", "hr"), None);
        assert!(!m.remove_database("sales"));
    }

    #[test]
    fn pushing_rows_and_columns_keeps_shape() {
        let mut m = matrix();
        m.push_database("ops");
        m.push_user("carol");
        assert!(m.set_role("carol", "ops", Some(Role::Read)));
        assert_eq!(m.role("alice", "ops"), None);
        assert_eq!(m.role("carol", "sales"), None);
        assert!(!m.set_role("ghost", "ops", Some(Role::Read)));
        assert!(m.remove_user("alice"));
        assert_eq!(m.users(), ["bob", "carol"]);
    }

    #[test]
    fn column_grants_lists_non_null_cells() {
        let mut m = matrix();
        m.set_role("bob", "sales", Some(Role::ReadWrite));
        assert_eq!(m.column_grants("sales"), vec![("alice".to_string(), Role::Read), ("bob".to_string(), Role::ReadWrite)]);
        assert!(m.column_grants("missing").is_empty());
    }
}
