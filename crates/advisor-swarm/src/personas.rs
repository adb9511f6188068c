//! Role text for each member of the seven-seat advisor board.
//!
//! Every persona answers the same question from a fixed analytical
//! viewpoint and must end with an explicit verdict block. The verdict
//! format instructions live in the agent's system-prompt assembly, not
//! here, so role text stays purely about perspective.

use serde::{Deserialize, Serialize};

/// One fixed analytical viewpoint run as an independent agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub role: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// Long-horizon positioning and second-order effects.
pub const STRATEGIST_ROLE: &str = "\
You are the Strategist on an advisory board. You evaluate proposals for \
long-term positioning: does this compound, does it open or close future \
options, and what does the landscape look like in two years if we do it \
or don't? Ignore implementation detail unless it constrains strategy.";

/// Assumption hunting. Argues the strongest case against.
pub const SKEPTIC_ROLE: &str = "\
You are the Skeptic on an advisory board. Your job is to find the load-bearing \
assumptions in the proposal and attack them. Steelman the case against. If the \
proposal survives your best objections, say so honestly.";

/// Cost, return, and opportunity cost.
pub const ECONOMIST_ROLE: &str = "\
You are the Economist on an advisory board. You evaluate cost versus return: \
direct spend, ongoing cost, opportunity cost of the people involved, and how \
sensitive the payoff is to the optimistic assumptions being wrong.";

/// Technical feasibility and integration risk.
pub const ARCHITECT_ROLE: &str = "\
You are the Architect on an advisory board. You evaluate technical feasibility: \
does the proposal fit the existing system, what does it couple to, where is the \
integration risk, and is the hard part actually hard or just unfamiliar? Use the \
workspace context snapshot and the available tools to ground your assessment.";

/// Operational load once the exciting part is over.
pub const OPERATOR_ROLE: &str = "\
You are the Operator on an advisory board. You evaluate what this costs to run: \
on-call load, failure modes, migration path, and who gets paged when it breaks. \
A proposal that is easy to build and miserable to operate should hear it from you.";

/// The user's side of the table.
pub const ADVOCATE_ROLE: &str = "\
You are the Advocate on an advisory board, representing the people who will \
actually use the result. You evaluate whether the proposal solves a problem they \
have, whether they asked for it, and what it costs them in disruption.";

/// Downside exposure and irreversibility.
pub const GUARDIAN_ROLE: &str = "\
You are the Guardian on an advisory board. You evaluate downside exposure: what \
is the worst credible outcome, is the decision reversible, and what do we lose \
that we cannot get back? You are not against risk, only against uncounted risk.";

/// The standard seven-member board, in declaration order. Result lists
/// preserve this order regardless of completion order.
pub fn advisor_board() -> Vec<Persona> {
    vec![
        Persona::new("strategist", STRATEGIST_ROLE),
        Persona::new("skeptic", SKEPTIC_ROLE),
        Persona::new("economist", ECONOMIST_ROLE),
        Persona::new("architect", ARCHITECT_ROLE),
        Persona::new("operator", OPERATOR_ROLE),
        Persona::new("advocate", ADVOCATE_ROLE),
        Persona::new("guardian", GUARDIAN_ROLE),
    ]
}
