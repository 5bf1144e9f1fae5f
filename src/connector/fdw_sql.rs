//! SQL text builders for FDW objects
//!
//! Identifiers are always double-quoted and option values single-quote escaped.

/// Ordered `(name, value)` pairs for an `OPTIONS (...)` clause
pub type FdwOptions = Vec<(String, String)>;

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', "''")
}

pub fn qualified_table_name(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => {
            format!("{}.{}", quote_identifier(schema), quote_identifier(table))
        }
        _ => quote_identifier(table),
    }
}

/// Option names that are not all-lowercase must be quoted to survive case folding
fn quote_option_name(name: &str) -> String {
    if name.to_lowercase() != name {
        quote_identifier(name)
    } else {
        name.to_string()
    }
}

pub fn options_clause(options: &[(String, String)]) -> String {
    if options.is_empty() {
        return String::new();
    }
    let list = options
        .iter()
        .map(|(name, value)| format!("{} '{}'", quote_option_name(name), escape_single_quotes(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(" OPTIONS ({})", list)
}

pub fn create_server(fdw: &str, server_name: &str, options: &[(String, String)]) -> String {
    format!(
        "CREATE SERVER {} FOREIGN DATA WRAPPER {}{};",
        quote_identifier(server_name),
        fdw,
        options_clause(options)
    )
}

pub fn create_usermap(server_name: &str, user_name: &str, options: &[(String, String)]) -> String {
    format!(
        "CREATE USER MAPPING FOR {} SERVER {}{};",
        quote_identifier(user_name),
        quote_identifier(server_name),
        options_clause(options)
    )
}

pub fn import_foreign_schema(
    server_name: &str,
    remote_schema: &str,
    schema: &str,
    limit_to: Option<&[&str]>,
    options: &[(String, String)],
) -> String {
    let limit = match limit_to {
        Some(tables) if !tables.is_empty() => format!(
            " LIMIT TO ({})",
            tables
                .iter()
                .map(|t| quote_identifier(t))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        _ => String::new(),
    };
    format!(
        "IMPORT FOREIGN SCHEMA {}{} FROM SERVER {} INTO {}{};",
        quote_identifier(remote_schema),
        limit,
        quote_identifier(server_name),
        quote_identifier(schema),
        options_clause(options)
    )
}

pub fn create_foreign_table(
    server_name: &str,
    schema: &str,
    table: &str,
    columns: &[&str],
    options: &[(String, String)],
) -> String {
    format!(
        "CREATE FOREIGN TABLE {} ({}) SERVER {}{};",
        qualified_table_name(Some(schema), table),
        columns.join(", "),
        quote_identifier(server_name),
        options_clause(options)
    )
}

pub fn grant_select(schema: &str, table: &str, user_name: &str) -> String {
    format!(
        "GRANT SELECT ON {} TO {};",
        qualified_table_name(Some(schema), table),
        quote_identifier(user_name)
    )
}

pub fn rename_foreign_table(schema: &str, table: &str, new_name: &str) -> String {
    format!(
        "ALTER FOREIGN TABLE {} RENAME TO {};",
        qualified_table_name(Some(schema), table),
        quote_identifier(new_name)
    )
}

pub fn set_foreign_table_schema(schema: &str, table: &str, new_schema: &str) -> String {
    format!(
        "ALTER FOREIGN TABLE {} SET SCHEMA {};",
        qualified_table_name(Some(schema), table),
        quote_identifier(new_schema)
    )
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {};", quote_identifier(schema))
}

pub fn drop_schema(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE;", quote_identifier(schema))
}

pub fn copy_foreign_table(local_table: &str, foreign_table: &str, max_rows: Option<u64>) -> String {
    let limit = match max_rows {
        Some(n) if n > 0 => format!(" LIMIT {}", n),
        _ => String::new(),
    };
    format!("CREATE TABLE {} AS SELECT * FROM {}{};", local_table, foreign_table, limit)
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT count(*)::text AS num_rows FROM {};", table)
}

pub fn drop_server(server_name: &str) -> String {
    format!("DROP SERVER IF EXISTS {} CASCADE;", quote_identifier(server_name))
}

pub fn drop_usermap(server_name: &str, user_name: &str) -> String {
    format!(
        "DROP USER MAPPING IF EXISTS FOR {} SERVER {};",
        quote_identifier(user_name),
        quote_identifier(server_name)
    )
}

pub fn drop_foreign_table(schema: &str, table: &str) -> String {
    format!(
        "DROP FOREIGN TABLE IF EXISTS {} CASCADE;",
        qualified_table_name(Some(schema), table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> FdwOptions {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_create_server_with_options() {
        let sql = create_server(
            "odbc_fdw",
            "mysql_abc",
            &opts(&[("odbc_DRIVER", "MySQL"), ("odbc_SERVER", "db.example.com")]),
        );
        assert_eq!(
            sql,
            "CREATE SERVER \"mysql_abc\" FOREIGN DATA WRAPPER odbc_fdw \
             OPTIONS (\"odbc_DRIVER\" 'MySQL', \"odbc_SERVER\" 'db.example.com');"
        );
    }

    #[test]
    fn test_option_values_are_escaped() {
        let sql = create_usermap("srv", "bob", &opts(&[("password", "it's")]));
        assert_eq!(
            sql,
            "CREATE USER MAPPING FOR \"bob\" SERVER \"srv\" OPTIONS (password 'it''s');"
        );
    }

    #[test]
    fn test_import_foreign_schema_limited() {
        let sql = import_foreign_schema("srv", "public", "cdb_importer", Some(&["roads"][..]), &[]);
        assert_eq!(
            sql,
            "IMPORT FOREIGN SCHEMA \"public\" LIMIT TO (\"roads\") FROM SERVER \"srv\" INTO \"cdb_importer\";"
        );
        let unlimited = import_foreign_schema("srv", "public", "cdb_importer", None, &[]);
        assert!(!unlimited.contains("LIMIT TO"));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_table_name(None, "t"), "\"t\"");
        assert_eq!(qualified_table_name(Some("s"), "t"), "\"s\".\"t\"");
    }

    #[test]
    fn test_copy_foreign_table_limit() {
        assert_eq!(
            copy_foreign_table("\"s\".\"t\"", "\"f\".\"ft\"", Some(10)),
            "CREATE TABLE \"s\".\"t\" AS SELECT * FROM \"f\".\"ft\" LIMIT 10;"
        );
        assert!(!copy_foreign_table("a", "b", Some(0)).contains("LIMIT"));
        assert!(!copy_foreign_table("a", "b", None).contains("LIMIT"));
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(drop_server("srv"), "DROP SERVER IF EXISTS \"srv\" CASCADE;");
        assert_eq!(
            drop_usermap("srv", "postgres"),
            "DROP USER MAPPING IF EXISTS FOR \"postgres\" SERVER \"srv\";"
        );
        assert_eq!(
            drop_foreign_table("cdb_importer", "srv_t"),
            "DROP FOREIGN TABLE IF EXISTS \"cdb_importer\".\"srv_t\" CASCADE;"
        );
    }

    #[test]
    fn test_rename_and_grant() {
        assert_eq!(
            rename_foreign_table("cdb_importer", "roads", "srv_roads"),
            "ALTER FOREIGN TABLE \"cdb_importer\".\"roads\" RENAME TO \"srv_roads\";"
        );
        assert_eq!(
            grant_select("cdb_importer", "srv_roads", "bob"),
            "GRANT SELECT ON \"cdb_importer\".\"srv_roads\" TO \"bob\";"
        );
    }

    #[test]
    fn test_schema_statements() {
        assert_eq!(create_schema("srv"), "CREATE SCHEMA \"srv\";");
        assert_eq!(drop_schema("srv"), "DROP SCHEMA IF EXISTS \"srv\" CASCADE;");
        assert_eq!(
            set_foreign_table_schema("srv", "srv_roads", "cdb_importer"),
            "ALTER FOREIGN TABLE \"srv\".\"srv_roads\" SET SCHEMA \"cdb_importer\";"
        );
    }
}
