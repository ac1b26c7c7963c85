//! Statement authorizer gating client commands by permission.

use rusqlite::hooks::{AuthAction, AuthContext, Authorization};

use crate::types::Permission;

/// Decide whether a planned operation may run for a session holding
/// `permission`.
///
/// Reads and ordinary functions are always allowed, `load_extension` never
/// is, and data changes need the update bit. Schema changes, attaching
/// databases and similar are denied outright.
#[must_use]
pub fn authorize(permission: Permission, ctx: &AuthContext<'_>) -> Authorization {
    let can_update = permission.contains(Permission::UPDATE);
    match ctx.action {
        AuthAction::Function { function_name } => {
            if function_name.eq_ignore_ascii_case("load_extension") {
                Authorization::Deny
            } else {
                Authorization::Allow
            }
        }
        AuthAction::Select
        | AuthAction::Read { .. }
        | AuthAction::Recursive
        | AuthAction::Transaction { .. }
        | AuthAction::Savepoint { .. } => Authorization::Allow,
        AuthAction::Insert { .. } | AuthAction::Update { .. } | AuthAction::Delete { .. } => {
            if can_update {
                Authorization::Allow
            } else {
                Authorization::Deny
            }
        }
        AuthAction::Pragma { pragma_name, .. } => {
            if can_update && pragma_name.eq_ignore_ascii_case("synchronous") {
                Authorization::Allow
            } else {
                Authorization::Deny
            }
        }
        _ => Authorization::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn connection_with(permission: Permission) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        conn.authorizer(Some(move |ctx: AuthContext<'_>| authorize(permission, &ctx)));
        conn
    }

    #[test]
    fn test_select_allowed_without_update() {
        let conn = connection_with(Permission::SELECT);
        let value: i64 = conn
            .query_row("SELECT a FROM t WHERE (abs(a) = 1)", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_writes_need_update_bit() {
        let conn = connection_with(Permission::SELECT);
        assert!(conn.execute("UPDATE t SET a = 2", []).is_err());
        assert!(conn.execute("DELETE FROM t", []).is_err());

        let conn = connection_with(Permission::ALL);
        assert_eq!(conn.execute("UPDATE t SET a = 2", []).unwrap(), 1);
    }

    #[test]
    fn test_schema_changes_denied_even_with_update() {
        let conn = connection_with(Permission::ALL);
        assert!(conn.execute("DROP TABLE t", []).is_err());
        assert!(conn.execute("CREATE TABLE u (b)", []).is_err());
        assert!(conn.execute("ATTACH DATABASE ':memory:' AS other", []).is_err());
    }

    #[test]
    fn test_load_extension_denied() {
        let conn = connection_with(Permission::ALL);
        let result: rusqlite::Result<i64> =
            conn.query_row("SELECT load_extension('evil')", [], |r| r.get(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_only_synchronous_pragma_with_update() {
        let conn = connection_with(Permission::ALL);
        assert!(conn.execute_batch("PRAGMA synchronous = OFF").is_ok());
        assert!(conn.execute_batch("PRAGMA user_version = 9").is_err());

        let conn = connection_with(Permission::SELECT);
        assert!(conn.execute_batch("PRAGMA synchronous = OFF").is_err());
    }
}
