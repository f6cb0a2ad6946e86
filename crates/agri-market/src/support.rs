//! Support tickets raised by users and worked by platform staff.
//!
//! ```text
//! open ──► in_review ──► resolved ──► closed
//!   │          │            │
//!   │          └────────────┼───────► closed
//!   └───────────────────────┴───────► closed
//! ```
//!
//! A resolved ticket may be reopened.

use std::collections::HashMap;

use agri_proto::{BookingId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Ticket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Waiting for staff.
    #[default]
    Open,
    /// A staff member is on it.
    InReview,
    /// Staff consider the issue handled.
    Resolved,
    /// No further work.
    Closed,
}

impl TicketStatus {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::InReview)
                | (Self::Open | Self::InReview, Self::Resolved)
                | (Self::Open | Self::InReview | Self::Resolved, Self::Closed)
                | (Self::Resolved, Self::Open)
        )
    }

    /// Parse the snake-case wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "in_review" => Some(Self::InReview),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InReview => write!(f, "in_review"),
            Self::Resolved => write!(f, "resolved"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// How soon staff should look at a ticket. Orders low to urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    /// Whenever convenient.
    Low,
    /// Normal handling.
    #[default]
    Medium,
    /// Ahead of normal work.
    High,
    /// Money or a job is at stake right now.
    Urgent,
}

/// Input for a new ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicket {
    /// Booking the issue concerns.
    #[serde(default)]
    pub booking: Option<BookingId>,
    /// One-line summary.
    pub subject: String,
    /// Full account of the issue.
    pub description: String,
    /// Requested urgency.
    #[serde(default)]
    pub priority: TicketPriority,
}

/// A support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTicket {
    /// Identifier.
    pub id: TicketId,
    /// User who raised it.
    pub submitter: UserId,
    /// Booking it concerns.
    pub booking: Option<BookingId>,
    /// One-line summary.
    pub subject: String,
    /// Full account of the issue.
    pub description: String,
    /// Lifecycle state.
    pub status: TicketStatus,
    /// Urgency.
    pub priority: TicketPriority,
    /// Staff member working it.
    pub assigned_to: Option<UserId>,
    /// When it was last resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Longest accepted subject, in characters.
pub const MAX_SUBJECT_CHARS: usize = 255;

/// All support tickets.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SupportDesk {
    tickets: HashMap<TicketId, SupportTicket>,
}

impl SupportDesk {
    /// Creates an empty desk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether no tickets exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Opens a ticket. Callers check the submitter and booking exist.
    pub fn open(&mut self, submitter: UserId, input: NewTicket) -> MarketResult<&SupportTicket> {
        let subject = input.subject.trim();
        if subject.is_empty() {
            return Err(MarketError::Validation("ticket subject is required".to_string()));
        }
        if subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(MarketError::Validation(format!(
                "ticket subject is longer than {MAX_SUBJECT_CHARS} characters"
            )));
        }
        let description = input.description.trim();
        if description.is_empty() {
            return Err(MarketError::Validation(
                "ticket description is required".to_string(),
            ));
        }

        let now = Utc::now();
        let ticket = SupportTicket {
            id: TicketId::new(),
            submitter,
            booking: input.booking,
            subject: subject.to_string(),
            description: description.to_string(),
            status: TicketStatus::Open,
            priority: input.priority,
            assigned_to: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        Ok(self.tickets.entry(ticket.id).or_insert(ticket))
    }

    /// Gets a ticket, failing when absent.
    pub fn require(&self, id: TicketId) -> MarketResult<&SupportTicket> {
        self.tickets
            .get(&id)
            .ok_or_else(|| MarketError::not_found("ticket", id))
    }

    fn require_mut(&mut self, id: TicketId) -> MarketResult<&mut SupportTicket> {
        self.tickets
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("ticket", id))
    }

    /// Tickets a user raised, newest first.
    pub fn for_submitter(&self, user: UserId) -> Vec<&SupportTicket> {
        let mut items: Vec<_> = self
            .tickets
            .values()
            .filter(|t| t.submitter == user)
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// The staff queue: most urgent first, then oldest first.
    pub fn queue(&self, status: Option<TicketStatus>) -> Vec<&SupportTicket> {
        let mut items: Vec<_> = self
            .tickets
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        items
    }

    /// Hands a ticket to a staff member. An open ticket moves to review.
    pub fn assign(&mut self, id: TicketId, assignee: UserId) -> MarketResult<&SupportTicket> {
        let ticket = self.require_mut(id)?;
        if ticket.status == TicketStatus::Closed {
            return Err(MarketError::Conflict(format!("ticket {id} is closed")));
        }
        ticket.assigned_to = Some(assignee);
        if ticket.status == TicketStatus::Open {
            ticket.status = TicketStatus::InReview;
        }
        ticket.updated_at = Utc::now();
        Ok(ticket)
    }

    /// Moves a ticket along its lifecycle.
    pub fn transition(&mut self, id: TicketId, to: TicketStatus) -> MarketResult<&SupportTicket> {
        let ticket = self.require_mut(id)?;
        if !ticket.status.can_transition_to(&to) {
            return Err(MarketError::InvalidStateTransition {
                from: ticket.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        match to {
            TicketStatus::Resolved => ticket.resolved_at = Some(now),
            TicketStatus::Open => ticket.resolved_at = None,
            TicketStatus::InReview | TicketStatus::Closed => {}
        }
        ticket.status = to;
        ticket.updated_at = now;
        Ok(ticket)
    }
}
