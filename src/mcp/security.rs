//! Allow/deny/confirm policy for tool calls.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

use super::permissions::{PermissionRecord, PermissionTier};
use super::redact::redact;

/// Why a call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Dangerous call while confirmation was required but not possible.
    RequiresConfirmation,
    /// Critical calls have no override path.
    CriticalNeverAllowed,
    UserDeclined,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DenialReason::RequiresConfirmation => "requires confirmation (dangerous operation)",
            DenialReason::CriticalNeverAllowed => "critical: never allowed",
            DenialReason::UserDeclined => "user declined",
        };
        f.write_str(reason)
    }
}

/// Outcome of validating one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed { user_confirmed: bool },
    Denied(DenialReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResponse {
    Yes,
    No,
    /// Yes, and stop asking for this server/tool pair for the process lifetime.
    Always,
}

impl ConfirmationResponse {
    /// Anything other than an explicit yes/always is a refusal.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => ConfirmationResponse::Yes,
            "a" | "always" => ConfirmationResponse::Always,
            _ => ConfirmationResponse::No,
        }
    }
}

/// What the user is shown before a dangerous call.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tier: PermissionTier,
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    /// Already redacted.
    pub arguments: Value,
}

impl ConfirmationRequest {
    fn new(record: &PermissionRecord, arguments: &Value) -> Self {
        Self {
            tier: record.tier,
            server_name: record.server_name.clone(),
            tool_name: record.tool_name.clone(),
            description: record.description.clone(),
            arguments: redact(arguments),
        }
    }

    pub fn render(&self) -> String {
        let arguments = serde_json::to_string_pretty(&self.arguments)
            .unwrap_or_else(|_| self.arguments.to_string());
        format!(
            "\n⚠️  WARNING: {} OPERATION\nServer: {}\nTool: {}\nDescription: {}\nArguments: {}\n\nAllow this operation? (yes/no/always): ",
            self.tier.as_str().to_uppercase(),
            self.server_name,
            self.tool_name,
            self.description,
            arguments
        )
    }
}

/// Source of interactive confirmation answers.
///
/// Waiting on a human is an unbounded suspension; implementations may add
/// their own timeout.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationResponse;
}

/// Prompts on stdout and reads the answer from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationResponse {
        let prompt = request.render();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stdout = io::stdout();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => ConfirmationResponse::parse(&line),
            Ok(Err(err)) => {
                warn!(error = %err, "Failed to read confirmation; treating as no");
                ConfirmationResponse::No
            }
            Err(err) => {
                warn!(error = %err, "Confirmation prompt task failed; treating as no");
                ConfirmationResponse::No
            }
        }
    }
}

/// Server/tool pairs approved with "always". Lives as long as the process;
/// unregistering a server does not clear it.
#[derive(Debug, Default)]
pub struct ConfirmationMemory {
    approved: HashMap<String, HashSet<String>>,
}

impl ConfirmationMemory {
    pub fn remember(&mut self, server_name: &str, tool_name: &str) {
        self.approved
            .entry(server_name.to_string())
            .or_default()
            .insert(tool_name.to_string());
    }

    pub fn is_remembered(&self, server_name: &str, tool_name: &str) -> bool {
        self.approved
            .get(server_name)
            .is_some_and(|tools| tools.contains(tool_name))
    }
}

pub struct SecurityValidator {
    enable_confirmation: bool,
    confirmer: Box<dyn Confirmer>,
    memory: ConfirmationMemory,
}

impl fmt::Debug for SecurityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityValidator")
            .field("enable_confirmation", &self.enable_confirmation)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl SecurityValidator {
    pub fn new(enable_confirmation: bool, confirmer: Box<dyn Confirmer>) -> Self {
        Self {
            enable_confirmation,
            confirmer,
            memory: ConfirmationMemory::default(),
        }
    }

    /// Validator that prompts on the terminal.
    pub fn interactive(enable_confirmation: bool) -> Self {
        Self::new(enable_confirmation, Box::new(TerminalConfirmer))
    }

    pub fn confirmation_enabled(&self) -> bool {
        self.enable_confirmation
    }

    pub fn memory(&self) -> &ConfirmationMemory {
        &self.memory
    }

    /// Decides whether a call may proceed, asking the user when policy
    /// requires it and `skip_confirmation` is not set.
    ///
    /// Critical calls are refused before any confirmation path is reached.
    pub async fn validate(
        &mut self,
        record: &PermissionRecord,
        arguments: &Value,
        skip_confirmation: bool,
    ) -> Verdict {
        match record.tier {
            PermissionTier::Critical => {
                warn!(
                    server = %record.server_name,
                    tool = %record.tool_name,
                    "Refusing critical operation"
                );
                return Verdict::Denied(DenialReason::CriticalNeverAllowed);
            }
            PermissionTier::Safe | PermissionTier::Normal => {
                return Verdict::Allowed {
                    user_confirmed: false,
                }
            }
            PermissionTier::Dangerous => {}
        }

        if !self.enable_confirmation {
            debug!(tool = %record.tool_name, "Dangerous operation auto-allowed");
            return Verdict::Allowed {
                user_confirmed: false,
            };
        }

        if self
            .memory
            .is_remembered(&record.server_name, &record.tool_name)
        {
            debug!(tool = %record.tool_name, "Using remembered confirmation");
            return Verdict::Allowed {
                user_confirmed: true,
            };
        }

        if skip_confirmation {
            return Verdict::Denied(DenialReason::RequiresConfirmation);
        }

        let request = ConfirmationRequest::new(record, arguments);
        match self.confirmer.confirm(&request).await {
            ConfirmationResponse::Yes => Verdict::Allowed {
                user_confirmed: true,
            },
            ConfirmationResponse::Always => {
                info!(
                    server = %record.server_name,
                    tool = %record.tool_name,
                    "Remembering approval for this session"
                );
                self.memory
                    .remember(&record.server_name, &record.tool_name);
                Verdict::Allowed {
                    user_confirmed: true,
                }
            }
            ConfirmationResponse::No => Verdict::Denied(DenialReason::UserDeclined),
        }
    }
}
