//! Idempotent seeding of permissions and system roles into the graph store.

use serde_json::json;

use crate::services::graph::{GraphError, GraphStore, Record};

/// A permission seeded on bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct PermissionSeed {
    pub name: &'static str,
    pub resource_type: &'static str,
    pub action: &'static str,
    pub description: &'static str,
}

/// A system role seeded on bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub priority: i64,
    /// `None` grants every standard permission.
    pub permissions: Option<&'static [&'static str]>,
}

impl RoleSeed {
    pub fn permission_names(&self) -> Vec<&'static str> {
        match self.permissions {
            Some(names) => names.to_vec(),
            None => STANDARD_PERMISSIONS.iter().map(|p| p.name).collect(),
        }
    }
}

const fn permission(
    name: &'static str,
    resource_type: &'static str,
    action: &'static str,
    description: &'static str,
) -> PermissionSeed {
    PermissionSeed {
        name,
        resource_type,
        action,
        description,
    }
}

pub const STANDARD_PERMISSIONS: &[PermissionSeed] = &[
    permission("user:create", "user", "create", "Create new users"),
    permission("user:read", "user", "read", "View user information"),
    permission("user:update", "user", "update", "Update user information"),
    permission("user:delete", "user", "delete", "Delete users"),
    permission("group:create", "group", "create", "Create new groups"),
    permission("group:read", "group", "read", "View group information"),
    permission("group:update", "group", "update", "Update group information"),
    permission("group:delete", "group", "delete", "Delete groups"),
    permission("role:create", "role", "create", "Create new roles"),
    permission("role:read", "role", "read", "View role information"),
    permission("role:update", "role", "update", "Update role information"),
    permission("role:delete", "role", "delete", "Delete roles"),
    permission("organization:create", "organization", "create", "Create organizations"),
    permission("organization:read", "organization", "read", "View organizations"),
    permission("organization:update", "organization", "update", "Update organizations"),
    permission("organization:delete", "organization", "delete", "Delete organizations"),
    permission("blueprint:read", "blueprint", "read", "View blueprints"),
    permission("blueprint:write", "blueprint", "write", "Create/update blueprints"),
    permission("blueprint:delete", "blueprint", "delete", "Delete blueprints"),
    permission("project:read", "project", "read", "View projects"),
    permission("project:write", "project", "write", "Create/update projects"),
    permission("project:delete", "project", "delete", "Delete projects"),
];

pub const DEFAULT_ROLES: &[RoleSeed] = &[
    RoleSeed {
        slug: "admin",
        name: "Administrator",
        description: "Full system access with all permissions",
        priority: 1000,
        permissions: None,
    },
    RoleSeed {
        slug: "developer",
        name: "Developer",
        description: "Standard developer access to projects and blueprints",
        priority: 500,
        permissions: Some(&[
            "blueprint:read",
            "blueprint:write",
            "project:read",
            "project:write",
            "organization:read",
            "organization:update",
            "group:read",
            "user:read",
        ]),
    },
    RoleSeed {
        slug: "readonly",
        name: "Read Only",
        description: "Read-only access to all resources",
        priority: 100,
        permissions: Some(&[
            "blueprint:read",
            "project:read",
            "organization:read",
            "group:read",
            "user:read",
            "role:read",
        ]),
    },
];

const DEFAULT_ORGANIZATION_SLUG: &str = "default";
const DEFAULT_GROUP_SLUG: &str = "users";

const MERGE_PERMISSION: &str = "\
OPTIONAL MATCH (existing:Permission {name: $name})
WITH existing IS NULL AS is_new
MERGE (p:Permission {name: $name})
SET p.resource_type = $resource_type,
    p.action = $action,
    p.description = $description
RETURN p.name AS name, is_new";

const MERGE_ROLE: &str = "\
OPTIONAL MATCH (existing:Role {slug: $slug})
WITH existing IS NULL AS is_new
MERGE (r:Role {slug: $slug})
SET r.name = $name,
    r.description = $description,
    r.priority = $priority,
    r.is_system = true
RETURN r.slug AS slug, is_new";

const GRANT_PERMISSION: &str = "\
MATCH (r:Role {slug: $slug})
MATCH (p:Permission {name: $permission})
MERGE (r)-[:GRANTS]->(p)";

const MERGE_ORGANIZATION: &str = "\
OPTIONAL MATCH (existing:Organization {slug: $slug})
WITH existing IS NULL AS is_new
MERGE (o:Organization {slug: $slug})
SET o.name = $name,
    o.description = $description
RETURN o.slug AS slug, is_new";

const MERGE_GROUP: &str = "\
MATCH (o:Organization {slug: $org_slug})
OPTIONAL MATCH (existing:Group {slug: $group_slug})
WITH o, existing IS NULL AS is_new
MERGE (g:Group {slug: $group_slug})
SET g.name = $group_name,
    g.description = $group_description
MERGE (g)-[:MANAGED_BY]->(o)
RETURN g.slug AS slug, is_new";

/// What a bootstrap run newly created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub permissions: usize,
    pub roles: usize,
    pub organization: bool,
    pub group: bool,
}

fn is_new(records: &[Record]) -> bool {
    records
        .first()
        .and_then(|r| r.get("is_new"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// True when any permission exists.
pub async fn check_if_seeded(graph: &GraphStore) -> Result<bool, GraphError> {
    let records = graph
        .run("MATCH (p:Permission) RETURN count(p) AS count", json!({}))
        .await?;
    let count = records
        .first()
        .and_then(|r| r.get("count"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    Ok(count > 0)
}

/// Merge the standard permissions; returns how many were created.
pub async fn seed_permissions(graph: &GraphStore) -> Result<usize, GraphError> {
    let mut created = 0;
    for permission in STANDARD_PERMISSIONS {
        let records = graph
            .run(
                MERGE_PERMISSION,
                json!({
                    "name": permission.name,
                    "resource_type": permission.resource_type,
                    "action": permission.action,
                    "description": permission.description,
                }),
            )
            .await?;
        if is_new(&records) {
            created += 1;
        }
    }
    tracing::info!(created, "Seeded permissions");
    Ok(created)
}

/// Merge the system roles and their grants; returns how many roles were created.
///
/// Grants reference permissions by name, so permissions must be seeded first.
pub async fn seed_default_roles(graph: &GraphStore) -> Result<usize, GraphError> {
    let mut created = 0;
    for role in DEFAULT_ROLES {
        let records = graph
            .run(
                MERGE_ROLE,
                json!({
                    "slug": role.slug,
                    "name": role.name,
                    "description": role.description,
                    "priority": role.priority,
                }),
            )
            .await?;
        if is_new(&records) {
            created += 1;
        }

        for name in role.permission_names() {
            graph
                .run(GRANT_PERMISSION, json!({ "slug": role.slug, "permission": name }))
                .await?;
        }
    }
    tracing::info!(created, "Seeded default roles");
    Ok(created)
}

pub async fn seed_default_organization(graph: &GraphStore) -> Result<bool, GraphError> {
    let records = graph
        .run(
            MERGE_ORGANIZATION,
            json!({
                "slug": DEFAULT_ORGANIZATION_SLUG,
                "name": "Default",
                "description": "Default organization",
            }),
        )
        .await?;
    let created = is_new(&records);
    tracing::info!(created, "Seeded default organization");
    Ok(created)
}

/// Requires the default organization to exist.
pub async fn seed_default_group(graph: &GraphStore) -> Result<bool, GraphError> {
    let records = graph
        .run(
            MERGE_GROUP,
            json!({
                "org_slug": DEFAULT_ORGANIZATION_SLUG,
                "group_slug": DEFAULT_GROUP_SLUG,
                "group_name": "Users",
                "group_description": "Default users group",
            }),
        )
        .await?;
    let created = is_new(&records);
    tracing::info!(created, "Seeded default users group");
    Ok(created)
}

/// Seed everything in dependency order. Safe to run repeatedly.
pub async fn bootstrap_auth_system(graph: &GraphStore) -> Result<SeedSummary, GraphError> {
    tracing::info!("Starting authentication system bootstrap");

    let summary = SeedSummary {
        permissions: seed_permissions(graph).await?,
        roles: seed_default_roles(graph).await?,
        organization: seed_default_organization(graph).await?,
        group: seed_default_group(graph).await?,
    };

    tracing::info!(
        permissions = summary.permissions,
        roles = summary.roles,
        organization = summary.organization,
        group = summary.group,
        "Bootstrap complete"
    );
    Ok(summary)
}
