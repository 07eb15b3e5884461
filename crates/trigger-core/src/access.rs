//! Who may trigger a build, and for which target branches.
//!
//! Actor authorization and the target-branch filter are independent necessary
//! conditions. Actor rules apply in order: `permit_all`, admin list, whitelist,
//! organization membership. Login and organization tokens compare
//! case-insensitively.

use crate::collaborators::Persistence;
use crate::domain::{self, SharedConfig};
use crate::obs;
use trigger_state::TriggerConfig;

/// Why an actor was let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    PermitAll,
    Admin,
    Whitelist,
    Organization(String),
}

/// Why an event was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The actor is in no list and no allowed organization.
    Actor,
    /// The pull request targets a branch outside the allow-list.
    TargetBranch(String),
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::Actor => write!(f, "actor is not authorized"),
            Denial::TargetBranch(branch) => write!(f, "target branch {branch:?} is not allowed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed(Grant),
    Denied(Denial),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }
}

/// Access rules of one trigger configuration. Pure; borrows the config.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy<'a> {
    config: &'a TriggerConfig,
}

impl<'a> AccessPolicy<'a> {
    pub fn new(config: &'a TriggerConfig) -> Self {
        Self { config }
    }

    pub fn is_admin(&self, actor: &str) -> bool {
        contains_token(&self.config.admin_list, actor)
    }

    pub fn is_whitelisted(&self, actor: &str) -> bool {
        contains_token(&self.config.whitelist, actor)
    }

    /// Organizations whose members may trigger builds.
    pub fn organizations(&self) -> impl Iterator<Item = &'a str> {
        self.config.org_list.split_whitespace()
    }

    /// Whether deciding on `actor` requires organization membership data.
    ///
    /// Lets callers skip remote lookups when the lists already decide.
    pub fn needs_membership_lookup(&self, actor: &str) -> bool {
        self.actor_grant(actor, &[]).is_none() && self.organizations().next().is_some()
    }

    /// Actor rules only. `memberships` are the organizations the actor belongs to.
    pub fn is_actor_authorized(&self, actor: &str, memberships: &[String]) -> bool {
        self.actor_grant(actor, memberships).is_some()
    }

    /// Target-branch rule only. An empty allow-list admits every branch.
    pub fn is_allowed_target_branch(&self, target_branch: &str) -> bool {
        let mut patterns = self
            .config
            .target_branches
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .peekable();
        if patterns.peek().is_none() {
            return true;
        }
        patterns.any(|pattern| branch_matches(pattern, target_branch))
    }

    /// Both conditions together.
    pub fn is_authorized(&self, actor: &str, memberships: &[String], target_branch: &str) -> bool {
        self.evaluate(actor, memberships, target_branch).is_allowed()
    }

    /// Both conditions, with the reason.
    pub fn evaluate(&self, actor: &str, memberships: &[String], target_branch: &str) -> AccessDecision {
        if !self.is_allowed_target_branch(target_branch) {
            return AccessDecision::Denied(Denial::TargetBranch(target_branch.to_string()));
        }
        match self.actor_grant(actor, memberships) {
            Some(grant) => AccessDecision::Allowed(grant),
            None => AccessDecision::Denied(Denial::Actor),
        }
    }

    fn actor_grant(&self, actor: &str, memberships: &[String]) -> Option<Grant> {
        if self.config.permit_all {
            return Some(Grant::PermitAll);
        }
        if self.is_admin(actor) {
            return Some(Grant::Admin);
        }
        if self.is_whitelisted(actor) {
            return Some(Grant::Whitelist);
        }
        self.organizations()
            .find(|org| memberships.iter().any(|m| m.eq_ignore_ascii_case(org)))
            .map(|org| Grant::Organization(org.to_string()))
    }
}

/// Append `login` to the trigger's whitelist and ask for the owning job to be saved.
///
/// The in-memory whitelist is authoritative: a failed save is logged and
/// swallowed, and the next successful save carries the appended login.
pub async fn add_to_whitelist(
    config: &SharedConfig,
    persistence: &dyn Persistence,
    job: &str,
    login: &str,
) {
    let login = login.trim();
    if login.is_empty() {
        return;
    }
    {
        let mut config = domain::write(config);
        config.whitelist = format!("{} {}", config.whitelist, login);
    }
    obs::emit_whitelist_appended(job, login);

    if let Err(err) = persistence.save().await {
        obs::emit_state_save_failed(job, &err);
    }
}

fn contains_token(list: &str, login: &str) -> bool {
    let login = login.trim();
    !login.is_empty()
        && list
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case(login))
}

fn branch_matches(pattern: &str, branch: &str) -> bool {
    pattern == branch || (pattern.contains('*') && glob_match(pattern, branch))
}

/// `*` matches any run of characters other than `/`.
fn glob_match(pattern: &str, value: &str) -> bool {
    let p = pattern.as_bytes();
    let v = value.as_bytes();
    let (mut pi, mut vi) = (0usize, 0usize);
    // Position of the last `*` and how far into `value` it currently reaches.
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        match p.get(pi) {
            Some(b'*') => {
                star = Some((pi, vi));
                pi += 1;
            }
            Some(&c) if c == v[vi] => {
                pi += 1;
                vi += 1;
            }
            _ => match star {
                Some((star_pi, star_vi)) if v[star_vi] != b'/' => {
                    star = Some((star_pi, star_vi + 1));
                    pi = star_pi + 1;
                    vi = star_vi + 1;
                }
                _ => return false,
            },
        }
    }

    p[pi..].iter().all(|&c| c == b'*')
}
