pub use super::agent_run_steps::Entity as AgentRunSteps;
pub use super::agent_runs::Entity as AgentRuns;
pub use super::agent_steps::Entity as AgentSteps;
pub use super::agents::Entity as Agents;
pub use super::credit_transactions::Entity as CreditTransactions;
pub use super::subscriptions::Entity as Subscriptions;
pub use super::templates::Entity as Templates;
pub use super::user_credits::Entity as UserCredits;
pub use super::users::Entity as Users;
