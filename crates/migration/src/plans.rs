//! Catalog of legacy quantity-based plans
//!
//! Only used to give the legacy snapshot a human-readable name. Plans the
//! catalog does not know are shown by id.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

const PLAN_CATALOG: &[PlanInfo] = &[
    PlanInfo {
        id: "personal-eur",
        name: "Personal",
        description: "100 hours per month, public and private repositories",
    },
    PlanInfo {
        id: "personal-usd",
        name: "Personal",
        description: "100 hours per month, public and private repositories",
    },
    PlanInfo {
        id: "professional-eur",
        name: "Professional",
        description: "Unlimited hours, parallel workspaces and team features",
    },
    PlanInfo {
        id: "professional-usd",
        name: "Professional",
        description: "Unlimited hours, parallel workspaces and team features",
    },
    PlanInfo {
        id: "professional-new-eur",
        name: "Unleashed",
        description: "Unlimited hours, larger workspaces and longer timeouts",
    },
    PlanInfo {
        id: "professional-new-usd",
        name: "Unleashed",
        description: "Unlimited hours, larger workspaces and longer timeouts",
    },
    PlanInfo {
        id: "team-professional-eur",
        name: "Team Professional",
        description: "Seat-based plan billed per team member",
    },
    PlanInfo {
        id: "team-professional-usd",
        name: "Team Professional",
        description: "Seat-based plan billed per team member",
    },
    PlanInfo {
        id: "team-unleashed-eur",
        name: "Team Unleashed",
        description: "Seat-based plan with larger workspaces and longer timeouts",
    },
    PlanInfo {
        id: "team-unleashed-usd",
        name: "Team Unleashed",
        description: "Seat-based plan with larger workspaces and longer timeouts",
    },
];

/// Look up a legacy plan by its backend id
pub fn find_plan(plan_id: &str) -> Option<&'static PlanInfo> {
    PLAN_CATALOG.iter().find(|plan| plan.id == plan_id)
}

/// Display name and description for a plan id
pub fn describe_plan(plan_id: &str) -> (String, String) {
    match find_plan(plan_id) {
        Some(plan) => (plan.name.to_string(), plan.description.to_string()),
        None => (plan_id.to_string(), String::new()),
    }
}
