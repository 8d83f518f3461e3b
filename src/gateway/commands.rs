//! Administrative command documents sent to the `admin` database.

use bson::{doc, Document as BsonDocument};

use crate::actions::Role;

pub fn create_user(name: &str, password: &str) -> BsonDocument {
    doc! { "createUser": name, "pwd": password, "roles": [] }
}

pub fn drop_user(name: &str) -> BsonDocument {
    doc! { "dropUser": name }
}

pub fn grant_roles(user: &str, db: &str, role: Role) -> BsonDocument {
    doc! { "grantRolesToUser": user, "roles": [ { "role": role.as_str(), "db": db } ] }
}

pub fn revoke_roles(user: &str, db: &str, role: Role) -> BsonDocument {
    doc! { "revokeRolesFromUser": user, "roles": [ { "role": role.as_str(), "db": db } ] }
}

/// Revoke of a role name we do not model, used when clearing a dropped database.
pub fn revoke_role_named(user: &str, db: &str, role: &str) -> BsonDocument {
    doc! { "revokeRolesFromUser": user, "roles": [ { "role": role, "db": db } ] }
}

pub fn ping() -> BsonDocument {
    doc! { "ping": 1 }
}

/// Name of the command in a command document (its first key).
pub fn command_name(command: &BsonDocument) -> &str {
    command.keys().next().map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    #[test]
    fn create_user_starts_without_roles() {
        let c = create_user("alice", "pw");
        assert_eq!(command_name(&c), "createUser");
        assert_eq!(c.get_str("pwd").unwrap(), "pw");
        assert_eq!(c.get_array("roles").unwrap().len(), 0);
    }

    #[test]
    fn grant_and_revoke_carry_role_db_pairs() {
        let g = grant_roles("alice", "sales", Role::ReadWrite);
        assert_eq!(command_name(&g), "grantRolesToUser");
        let roles = g.get_array("roles").unwrap();
        match &roles[0] {
            Bson::Document(d) => {
                assert_eq!(d.get_str("role").unwrap(), "readWrite");
                assert_eq!(d.get_str("db").unwrap(), "sales");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(command_name(&revoke_roles("alice", "sales", Role::Read)), "revokeRolesFromUser");
        assert_eq!(command_name(&drop_user("alice")), "dropUser");
    }
}
