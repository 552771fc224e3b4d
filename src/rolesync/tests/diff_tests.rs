//! Three-way diff behavior: ordering, renames, reuse and protected roles

use pg_rolesync::statement::expand_all;
use pg_rolesync::{Capabilities, Role, RoleAttribute, RoleOptions, RoleSet, Statement, Target};
use proptest::prelude::*;

fn options(text: &str) -> RoleOptions {
    let mut options: RoleOptions = text.parse().unwrap();
    options.fill_with_defaults();
    options
}

fn set(roles: Vec<Role>) -> RoleSet {
    roles.into_iter().collect()
}

fn position(statements: &[Statement], sql_prefix: &str) -> usize {
    statements
        .iter()
        .position(|s| s.sql.starts_with(sql_prefix))
        .unwrap_or_else(|| panic!("no statement starting with {sql_prefix}: {statements:#?}"))
}

// ============================================================================
// STABLE STATE
// ============================================================================

#[test]
fn test_diff_stable_state_is_empty() {
    let roles = set(vec![
        Role::new("devs").with_options(options("NOLOGIN")).with_members(["alice", "bob"]),
        Role::new("alice").with_options(options("LOGIN")),
        Role::new("bob").with_options(options("LOGIN CREATEDB")),
    ]);

    assert!(roles.diff(&roles, &roles, &Capabilities::all()).is_empty());
}

#[test]
fn test_diff_empty_sets() {
    let empty = RoleSet::new();
    assert!(empty.diff(&empty, &empty, &Capabilities::all()).is_empty());
}

// ============================================================================
// CREATION
// ============================================================================

#[test]
fn test_create_members_before_group_grant() {
    let desired = set(vec![
        Role::new("a_group").with_options(options("")).with_members(["z_user"]),
        Role::new("z_user").with_options(options("LOGIN")),
    ]);

    let statements = RoleSet::new().diff(&desired, &RoleSet::new(), &Capabilities::all());

    let create_user = position(&statements, "CREATE ROLE \"z_user\"");
    let create_group = position(&statements, "CREATE ROLE \"a_group\"");
    let grant = position(&statements, "GRANT \"a_group\" TO \"z_user\";");
    assert!(create_user < grant);
    assert!(create_group < grant);
    assert_eq!(statements.len(), 3);
}

#[test]
fn test_create_renders_supported_options_only() {
    let desired = set(vec![Role::new("alice").with_options(options("LOGIN"))]);
    let caps = Capabilities::from_columns(["rolcanlogin"]);

    let statements = RoleSet::new().diff(&desired, &RoleSet::new(), &caps);

    assert!(statements[0].sql.starts_with("CREATE ROLE \"alice\" WITH LOGIN;\n"));
}

// ============================================================================
// RENAME
// ============================================================================

#[test]
fn test_case_change_is_a_rename() {
    let managed = set(vec![Role::new("alice").with_options(options("LOGIN"))]);
    let desired = set(vec![Role::new("Alice").with_options(options("LOGIN"))]);

    let statements = managed.diff(&desired, &managed, &Capabilities::all());

    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].sql, "ALTER ROLE \"alice\" RENAME TO \"Alice\";");
}

#[test]
fn test_rename_does_not_touch_group_membership() {
    let available = set(vec![
        Role::new("alice").with_options(options("LOGIN")),
        Role::new("devs").with_options(options("")).with_members(["alice"]),
    ]);
    let desired = set(vec![
        Role::new("Alice").with_options(options("LOGIN")),
        Role::new("devs").with_options(options("")).with_members(["Alice"]),
    ]);

    let statements = available.diff(&desired, &available, &Capabilities::all());

    let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(sql, vec!["ALTER ROLE \"alice\" RENAME TO \"Alice\";"]);
}

#[test]
fn test_unmanaged_lowercase_role_is_not_renamed() {
    let available = set(vec![Role::new("alice").with_options(options("LOGIN"))]);
    let desired = set(vec![Role::new("Alice").with_options(options("LOGIN"))]);

    let statements = RoleSet::new().diff(&desired, &available, &Capabilities::all());

    assert_eq!(statements.len(), 1);
    assert!(statements[0].sql.starts_with("CREATE ROLE \"Alice\""));
}

#[test]
fn test_two_spellings_of_one_role_rename_once() {
    let managed = set(vec![Role::new("alice").with_options(options(""))]);
    let desired = set(vec![
        Role::new("ALICE").with_options(options("")),
        Role::new("Alice").with_options(options("")),
    ]);

    let statements = managed.diff(&desired, &managed, &Capabilities::all());

    let renames = statements.iter().filter(|s| s.sql.contains("RENAME TO")).count();
    let creates = statements.iter().filter(|s| s.sql.starts_with("CREATE ROLE")).count();
    assert_eq!(renames, 1);
    assert_eq!(creates, 1);
    assert!(!statements.iter().any(|s| s.sql.starts_with("DROP ROLE")));
}

// ============================================================================
// ALTERATION
// ============================================================================

#[test]
fn test_alter_existing_roles() {
    let available = set(vec![
        Role::new("alice").with_options(options("")),
        Role::new("devs").with_options(options("")).with_members(["bob"]),
        Role::new("bob").with_options(options("LOGIN")),
    ]);
    let desired = set(vec![
        Role::new("alice").with_options(options("LOGIN")),
        Role::new("devs").with_options(options("")).with_members(["alice"]),
        Role::new("bob").with_options(options("LOGIN")),
    ]);

    let statements = available.diff(&desired, &available, &Capabilities::from_columns(["rolcanlogin"]));

    let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "ALTER ROLE \"alice\" WITH LOGIN;",
            "GRANT \"devs\" TO \"alice\";",
            "REVOKE \"devs\" FROM \"bob\";",
        ]
    );
}

#[test]
fn test_unmanaged_existing_role_is_reused() {
    let available = set(vec![Role::new("alice").with_options(options(""))]);
    let desired = set(vec![Role::new("alice").with_options(options("LOGIN"))]);

    let statements = RoleSet::new().diff(&desired, &available, &Capabilities::all());

    assert_eq!(statements.len(), 1);
    assert!(statements[0].sql.starts_with("ALTER ROLE \"alice\" WITH"));
}

#[test]
fn test_hidden_superuser_attributes_never_diff() {
    let available = set(vec![Role::new("admin").with_options(options("SUPERUSER LOGIN"))]);
    let desired = set(vec![Role::new("admin").with_options(options("LOGIN"))]);

    let limited = Capabilities::all().without_superuser_attributes();
    assert!(available.diff(&desired, &available, &limited).is_empty());

    let statements = available.diff(&desired, &available, &Capabilities::all());
    assert_eq!(statements.len(), 1);
    assert!(statements[0].sql.contains("NOSUPERUSER"));
}

// ============================================================================
// DROP
// ============================================================================

#[test]
fn test_group_dropped_before_its_members() {
    let managed = set(vec![
        Role::new("devs").with_options(options("")).with_members(["alice"]),
        Role::new("alice").with_options(options("LOGIN")),
    ]);

    let statements = managed.diff(&RoleSet::new(), &managed, &Capabilities::all());

    let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(statements.len(), 4);
    assert_eq!(statements[0].target, Target::AllDatabases);
    assert!(sql[0].contains("REASSIGN OWNED BY \"devs\""));
    assert_eq!(sql[1], "DROP ROLE \"devs\";");
    assert_eq!(statements[2].target, Target::AllDatabases);
    assert!(sql[2].contains("REASSIGN OWNED BY \"alice\""));
    assert_eq!(sql[3], "DROP ROLE \"alice\";");
}

#[test]
fn test_public_is_never_dropped() {
    let managed = set(vec![Role::new("public"), Role::new("old")]);

    let statements = managed.diff(&RoleSet::new(), &managed, &Capabilities::all());

    assert!(statements.iter().all(|s| !s.sql.contains("\"public\"")));
    assert!(statements.iter().any(|s| s.sql == "DROP ROLE \"old\";"));
}

#[test]
fn test_placeholder_in_role_name_is_not_expanded() {
    let managed = set(vec![Role::new("team{dbname}")]);
    let databases = vec!["app".to_string()];

    let statements: Vec<Statement> =
        expand_all(managed.diff(&RoleSet::new(), &managed, &Capabilities::all()), &databases)
            .collect();

    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].target, Target::Database("app".to_string()));
    assert!(statements[0].sql.contains("REASSIGN OWNED BY \"team{dbname}\""));
    assert!(statements[0].sql.ends_with("DROP OWNED BY \"team{dbname}\";"));
    assert!(!statements[0].sql.contains("teamapp"));
    assert_eq!(statements[1].sql, "DROP ROLE \"team{dbname}\";");
}

#[test]
fn test_unmanaged_roles_are_kept() {
    let available = set(vec![Role::new("postgres"), Role::new("old")]);
    let managed = set(vec![Role::new("old")]);

    let statements = managed.diff(&RoleSet::new(), &available, &Capabilities::all());

    assert!(statements.iter().all(|s| !s.sql.contains("\"postgres\"")));
}

#[test]
fn test_full_sequence_order() {
    let managed = set(vec![
        Role::new("old").with_options(options("")),
        Role::new("bob").with_options(options("")),
        Role::new("carol").with_options(options("")),
    ]);
    let desired = set(vec![
        Role::new("Carol").with_options(options("")),
        Role::new("bob").with_options(options("LOGIN")),
        Role::new("new").with_options(options("")),
    ]);

    let statements = managed.diff(&desired, &managed, &Capabilities::all());

    let rename = position(&statements, "ALTER ROLE \"carol\" RENAME");
    let create = position(&statements, "CREATE ROLE \"new\"");
    let alter = position(&statements, "ALTER ROLE \"bob\" WITH");
    let drop = position(&statements, "DROP ROLE \"old\"");
    assert!(rename < create && create < alter && alter < drop);
    assert!(!statements.iter().any(|s| s.sql == "DROP ROLE \"carol\";"));
}

// ============================================================================
// PROPERTIES
// ============================================================================

const NAMES: [&str; 6] = ["alice", "bob", "carol", "devs", "ops", "public"];

fn role_set() -> impl Strategy<Value = RoleSet> {
    let names: Vec<&'static str> = NAMES.to_vec();
    prop::sample::subsequence(names.clone(), 0..=names.len())
        .prop_flat_map(move |chosen| {
            let n = chosen.len();
            let payload = (
                any::<bool>(),
                prop::sample::subsequence(names.clone(), 0..=names.len()),
            );
            (Just(chosen), prop::collection::vec(payload, n))
        })
        .prop_map(|(chosen, payloads)| {
            chosen
                .into_iter()
                .zip(payloads)
                .map(|(name, (login, members))| {
                    let mut opts = RoleOptions::new().with(RoleAttribute::CanLogin, login);
                    opts.fill_with_defaults();
                    // NAMES is sorted: members sort after their group, so no cycles.
                    let members = members.into_iter().filter(|m| *m > name);
                    Role::new(name).with_options(opts).with_members(members)
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn prop_stable_state_yields_nothing(roles in role_set()) {
        prop_assert!(roles.diff(&roles, &roles, &Capabilities::all()).is_empty());
    }

    #[test]
    fn prop_public_never_dropped(managed in role_set(), desired in role_set()) {
        let mut managed = managed;
        managed.insert(Role::new("public"));
        let statements = managed.diff(&desired, &managed, &Capabilities::all());

        for statement in statements.iter().filter(|s| s.sql.contains("DROP")) {
            prop_assert!(!statement.sql.contains("\"public\""));
        }
    }

    #[test]
    fn prop_created_roles_precede_their_grants(desired in role_set()) {
        let statements = RoleSet::new().diff(&desired, &RoleSet::new(), &Capabilities::all());

        for (i, statement) in statements.iter().enumerate() {
            if !statement.sql.starts_with("GRANT") {
                continue;
            }
            let role = desired.iter().find(|r| statement.sql.starts_with(&format!("GRANT \"{}\"", r.name))).unwrap();
            for member in role.members.iter().filter(|m| desired.contains(m.as_str()) && *m != &role.name) {
                let created = statements
                    .iter()
                    .position(|s| s.sql.starts_with(&format!("CREATE ROLE \"{member}\"")))
                    .unwrap();
                prop_assert!(created < i);
            }
        }
    }
}
