//! The marketplace aggregate.
//!
//! [`Marketplace`] owns every ledger and enforces the rules that span them:
//! role checks, availability against bookings and blackouts, and the money
//! movements each booking transition triggers. Callers hold it behind one
//! lock, so every operation (overlap check included) is serializable.
//!
//! Successful mutations queue [`MarketEvent`]s for [`Marketplace::take_events`]
//! and mark the state dirty. When opened on a directory,
//! [`Marketplace::take_snapshot`] encodes the dirty state and the returned
//! [`PendingSnapshot`] can be written after the caller releases its lock.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use agri_persist::JsonStore;
use agri_proto::{
    BookingId, CategoryId, DateRange, EquipmentId, NotificationId, PayoutId, TicketId, UserId,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::booking::{self, Booking, BookingLedger, BookingStatus, NewBooking, PaymentStatus, Quote};
use crate::catalog::{
    Blackout, Catalog, Equipment, EquipmentCategory, EquipmentFilter, EquipmentPatch,
    EquipmentStatus, MaintenanceRecord, NewEquipment,
};
use crate::config::MarketConfig;
use crate::discovery::{self, SearchHit, SearchQuery};
use crate::error::{MarketError, MarketResult};
use crate::events::MarketEvent;
use crate::notification::{Notification, NotificationLog};
use crate::payment::{
    CallbackOutcome, GatewayCallback, Payment, PaymentKind, PaymentLedger, PaymentMethod,
    PaymentState,
};
use crate::payout::{Payout, PayoutLedger, PayoutState};
use crate::review::{NewReview, Review, ReviewDirection, ReviewLedger};
use crate::support::{NewTicket, SupportDesk, SupportTicket, TicketStatus};
use crate::users::{FarmerProfile, NewUser, OperatorDetails, Role, ServiceArea, User, UserDirectory};

/// Snapshot file name inside the state directory.
const SNAPSHOT_NAME: &str = "marketplace";

/// How an admin settles a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// The job counts as done; the operator is paid.
    Complete,
    /// The job is cancelled; the farmer is refunded.
    Cancel,
}

/// Record counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    /// Registered users.
    pub users: usize,
    /// Live listings.
    pub equipment: usize,
    /// All bookings.
    pub bookings: usize,
    /// Bookings holding dates.
    pub active_bookings: usize,
    /// Support tickets not yet resolved or closed.
    pub open_tickets: usize,
}

/// All marketplace state.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Marketplace {
    users: UserDirectory,
    catalog: Catalog,
    bookings: BookingLedger,
    payments: PaymentLedger,
    payouts: PayoutLedger,
    reviews: ReviewLedger,
    notifications: NotificationLog,
    #[serde(default)]
    support: SupportDesk,
    #[serde(skip)]
    config: MarketConfig,
    #[serde(skip)]
    events: Vec<MarketEvent>,
    #[serde(skip)]
    store: Option<JsonStore>,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    snapshot_seq: u64,
    /// Sequence number of the newest snapshot on disk.
    #[serde(skip)]
    written_seq: Arc<Mutex<u64>>,
}

/// Encoded state waiting to be written to disk.
#[derive(Debug)]
pub struct PendingSnapshot {
    store: JsonStore,
    bytes: Vec<u8>,
    seq: u64,
    written_seq: Arc<Mutex<u64>>,
}

impl PendingSnapshot {
    /// Writes the snapshot unless a newer one already reached disk.
    ///
    /// Blocks on filesystem I/O. Failures are logged; in-memory state stays
    /// authoritative.
    pub fn write(&self) {
        let mut written = self
            .written_seq
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *written >= self.seq {
            debug!(seq = self.seq, "newer snapshot already written");
            return;
        }
        match self.store.write_bytes(&self.bytes) {
            Ok(()) => *written = self.seq,
            Err(e) => warn!(error = %e, "failed to save marketplace snapshot"),
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl Marketplace {
    /// Creates an empty marketplace that never touches disk.
    #[must_use]
    pub fn in_memory(config: MarketConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Opens the marketplace snapshot in `dir`, starting empty when none
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Persistence`] if the snapshot exists but
    /// cannot be read.
    pub fn open(dir: &Path, config: MarketConfig) -> MarketResult<Self> {
        let store = JsonStore::new(dir, SNAPSHOT_NAME);
        let mut market: Self = store.try_load()?.unwrap_or_default();
        market.config = config;
        info!(
            path = %store.path().display(),
            users = market.users.len(),
            bookings = market.bookings.len(),
            "marketplace loaded"
        );
        market.store = Some(store);
        Ok(market)
    }

    /// Active policy.
    #[must_use]
    pub const fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Drains queued events.
    pub fn take_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Encodes the state if it changed since the last call.
    ///
    /// Returns `None` when nothing changed or the marketplace is in-memory
    /// only. Snapshots carry increasing sequence numbers, so writing them
    /// out of order never replaces newer state with older.
    pub fn take_snapshot(&mut self) -> Option<PendingSnapshot> {
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        let store = self.store.clone()?;
        match store.encode(&*self) {
            Ok(bytes) => {
                self.snapshot_seq += 1;
                Some(PendingSnapshot {
                    store,
                    bytes,
                    seq: self.snapshot_seq,
                    written_seq: Arc::clone(&self.written_seq),
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to encode marketplace snapshot");
                None
            }
        }
    }

    /// Writes any pending snapshot on the calling thread.
    pub fn flush(&mut self) {
        if let Some(snapshot) = self.take_snapshot() {
            snapshot.write();
        }
    }

    /// Record counts.
    #[must_use]
    pub fn stats(&self) -> MarketStats {
        MarketStats {
            users: self.users.len(),
            equipment: self.catalog.iter().filter(|e| !e.is_deleted()).count(),
            bookings: self.bookings.len(),
            active_bookings: self.bookings.iter().filter(|b| b.status.is_active()).count(),
            open_tickets: self
                .support
                .queue(None)
                .iter()
                .filter(|t| matches!(t.status, TicketStatus::Open | TicketStatus::InReview))
                .count(),
        }
    }

    fn emit(&mut self, event: MarketEvent) {
        self.events.push(event);
    }

    fn emit_payment(&mut self, payment: &Payment) {
        self.emit(MarketEvent::PaymentUpdated {
            payment_id: payment.id,
            booking_id: payment.booking,
            kind: payment.kind,
            state: payment.state,
            amount: payment.amount,
        });
    }

    fn emit_payout(&mut self, payout: &Payout) {
        self.emit(MarketEvent::PayoutUpdated {
            payout_id: payout.id,
            booking_id: payout.booking,
            state: payout.state,
            net: payout.split.net,
        });
    }

    fn notify(
        &mut self,
        user: UserId,
        title: &str,
        message: impl Into<String>,
        booking: Option<BookingId>,
    ) {
        self.notifications.push(user, title, message, booking);
    }

    // Users

    fn ensure_self_or_admin(&self, actor: UserId, subject: UserId) -> MarketResult<()> {
        if actor == subject {
            return Ok(());
        }
        self.users.require_role(actor, Role::Admin).map(|_| ())
    }

    /// Registers a user.
    pub fn register_user(&mut self, input: NewUser) -> MarketResult<User> {
        let user = self.users.register(input)?;
        info!(user_id = %user.id, role = %user.role, "user registered");
        self.emit(MarketEvent::UserRegistered { user_id: user.id });
        self.mark_dirty();
        Ok(user)
    }

    /// Gets a user with profiles.
    pub fn user(&self, id: UserId) -> MarketResult<User> {
        self.users.require(id).cloned()
    }

    /// Sets a farmer's profile. The farmer or an admin may do so.
    pub fn set_farmer_profile(
        &mut self,
        actor: UserId,
        id: UserId,
        profile: FarmerProfile,
    ) -> MarketResult<User> {
        self.ensure_self_or_admin(actor, id)?;
        let user = self.users.set_farmer_profile(id, profile)?.clone();
        self.mark_dirty();
        Ok(user)
    }

    /// Sets an operator's details. The operator or an admin may do so.
    pub fn set_operator_profile(
        &mut self,
        actor: UserId,
        id: UserId,
        details: OperatorDetails,
    ) -> MarketResult<User> {
        self.ensure_self_or_admin(actor, id)?;
        let user = self.users.set_operator_profile(id, details)?.clone();
        self.mark_dirty();
        Ok(user)
    }

    /// Adds a county to an operator's service areas.
    pub fn add_service_area(
        &mut self,
        actor: UserId,
        id: UserId,
        area: ServiceArea,
    ) -> MarketResult<User> {
        self.ensure_self_or_admin(actor, id)?;
        let user = self.users.add_service_area(id, area)?.clone();
        self.mark_dirty();
        Ok(user)
    }

    /// Marks a user's identity as checked.
    pub fn verify_identity(&mut self, admin: UserId, id: UserId) -> MarketResult<User> {
        let user = self.users.verify_identity(admin, id)?.clone();
        info!(user_id = %id, "identity verified");
        self.mark_dirty();
        Ok(user)
    }

    // Catalog

    /// Adds an equipment category.
    pub fn add_category(&mut self, name: &str, description: &str) -> MarketResult<EquipmentCategory> {
        let category = self.catalog.add_category(name, description)?;
        info!(category_id = %category.id, name = %category.name, "category added");
        self.mark_dirty();
        Ok(category)
    }

    /// All categories, sorted by name.
    #[must_use]
    pub fn categories(&self) -> Vec<EquipmentCategory> {
        self.catalog.categories().into_iter().cloned().collect()
    }

    /// Gets a category.
    pub fn category(&self, id: CategoryId) -> MarketResult<EquipmentCategory> {
        self.catalog
            .category(id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("category", id))
    }

    fn live_equipment(&self, id: EquipmentId) -> MarketResult<&Equipment> {
        match self.catalog.get(id) {
            Some(e) if !e.is_deleted() => Ok(e),
            _ => Err(MarketError::not_found("equipment", id)),
        }
    }

    /// Lists a unit for rent. The owner must be an operator.
    pub fn list_equipment(&mut self, owner: UserId, input: NewEquipment) -> MarketResult<Equipment> {
        self.users.require_role(owner, Role::Operator)?;
        let equipment = self.catalog.insert(owner, input)?;
        info!(equipment_id = %equipment.id, owner = %owner, "equipment listed");
        self.emit(MarketEvent::EquipmentListed {
            equipment_id: equipment.id,
            owner,
        });
        self.mark_dirty();
        Ok(equipment)
    }

    /// Gets a live listing.
    pub fn equipment(&self, id: EquipmentId) -> MarketResult<Equipment> {
        self.live_equipment(id).cloned()
    }

    /// Listings matching a filter, newest first.
    #[must_use]
    pub fn equipment_list(&self, filter: &EquipmentFilter) -> Vec<Equipment> {
        self.catalog.list(filter).into_iter().cloned().collect()
    }

    /// Updates a listing. Owner only.
    pub fn update_equipment(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        patch: EquipmentPatch,
    ) -> MarketResult<Equipment> {
        let equipment = self.catalog.update(id, actor, patch)?.clone();
        debug!(equipment_id = %id, "equipment updated");
        self.mark_dirty();
        Ok(equipment)
    }

    /// Sets a listing's status. Owner only.
    pub fn set_equipment_status(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        status: EquipmentStatus,
    ) -> MarketResult<Equipment> {
        let equipment = self.catalog.set_status(id, actor, status)?.clone();
        info!(equipment_id = %id, status = %status, "equipment status set");
        self.emit(MarketEvent::EquipmentStatusChanged {
            equipment_id: id,
            status,
        });
        self.mark_dirty();
        Ok(equipment)
    }

    /// Blocks out dates. The range may not overlap an active booking.
    pub fn add_blackout(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        blackout: Blackout,
    ) -> MarketResult<Equipment> {
        self.catalog.require_owned(id, actor)?;
        blackout.range.validate()?;
        if let Some(booking) = self.bookings.conflicting_active(id, &blackout.range, None) {
            return Err(MarketError::Conflict(format!(
                "blackout {} overlaps active booking {}",
                blackout.range, booking.id
            )));
        }
        let equipment = self.catalog.add_blackout(id, actor, blackout)?.clone();
        self.mark_dirty();
        Ok(equipment)
    }

    /// Removes a blackout by exact range.
    pub fn remove_blackout(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        range: DateRange,
    ) -> MarketResult<Equipment> {
        let equipment = self.catalog.remove_blackout(id, actor, range)?.clone();
        self.mark_dirty();
        Ok(equipment)
    }

    /// Marks a listing as inspected. Admin only.
    pub fn verify_equipment(&mut self, id: EquipmentId, admin: UserId) -> MarketResult<Equipment> {
        self.users.require_role(admin, Role::Admin)?;
        let equipment = self.catalog.verify(id)?.clone();
        info!(equipment_id = %id, "equipment verified");
        self.mark_dirty();
        Ok(equipment)
    }

    /// Logs a service.
    pub fn record_maintenance(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        record: MaintenanceRecord,
    ) -> MarketResult<Equipment> {
        let equipment = self.catalog.record_maintenance(id, actor, record)?.clone();
        self.mark_dirty();
        Ok(equipment)
    }

    /// Soft-deletes a listing. Refused while an active booking exists.
    pub fn remove_equipment(&mut self, id: EquipmentId, actor: UserId) -> MarketResult<Equipment> {
        self.catalog.require_owned(id, actor)?;
        if self.bookings.has_active(id) {
            return Err(MarketError::Conflict(format!(
                "equipment {id} has active bookings"
            )));
        }
        let equipment = self.catalog.soft_delete(id, actor)?.clone();
        info!(equipment_id = %id, "equipment removed");
        self.emit(MarketEvent::EquipmentRemoved { equipment_id: id });
        self.mark_dirty();
        Ok(equipment)
    }

    // Discovery

    /// Finds equipment near a farm.
    pub fn search(&self, query: &SearchQuery) -> MarketResult<Vec<SearchHit>> {
        discovery::search(&self.catalog, &self.bookings, &self.users, &self.config, query)
    }

    // Bookings

    /// Prices a rental without booking it.
    pub fn quote(
        &self,
        equipment_id: EquipmentId,
        dates: &DateRange,
        farm_county: &str,
    ) -> MarketResult<Quote> {
        let equipment = self.live_equipment(equipment_id)?;
        let transport = self.users.transport_fee(equipment.owner, farm_county);
        booking::quote(equipment, dates, transport, self.config.deposit)
    }

    fn ensure_bookable(equipment: &Equipment) -> MarketResult<()> {
        if equipment.status.is_bookable() {
            Ok(())
        } else {
            Err(MarketError::Unavailable {
                equipment_id: equipment.id,
                reason: format!("equipment is {}", equipment.status),
            })
        }
    }

    fn check_availability(
        &self,
        equipment: &Equipment,
        dates: &DateRange,
        exclude: Option<BookingId>,
    ) -> MarketResult<()> {
        if let Some(blackout) = equipment.blackout_conflict(dates) {
            return Err(MarketError::Unavailable {
                equipment_id: equipment.id,
                reason: format!("blacked out {}", blackout.range),
            });
        }
        if let Some(conflict) = self.bookings.conflicting_active(equipment.id, dates, exclude) {
            warn!(
                equipment_id = %equipment.id,
                conflicting = %conflict.id,
                dates = %dates,
                "double booking rejected"
            );
            return Err(MarketError::DoubleBooking {
                equipment_id: equipment.id,
                conflicting: conflict.id,
            });
        }
        Ok(())
    }

    /// Requests a booking. Farmer only.
    pub fn request_booking(&mut self, farmer: UserId, input: NewBooking) -> MarketResult<Booking> {
        self.users.require_role(farmer, Role::Farmer)?;
        input.dates.validate()?;
        if input.dates.start < today() {
            return Err(MarketError::Validation(
                "booking cannot start in the past".to_string(),
            ));
        }
        let equipment = self.live_equipment(input.equipment_id)?.clone();
        if equipment.owner == farmer {
            return Err(MarketError::Forbidden(
                "operators cannot book their own equipment".to_string(),
            ));
        }
        Self::ensure_bookable(&equipment)?;
        self.check_availability(&equipment, &input.dates, None)?;

        let transport = self
            .users
            .transport_fee(equipment.owner, &input.job.farm_county);
        let quote = booking::quote(&equipment, &input.dates, transport, self.config.deposit)?;
        let booking = self.bookings.create(farmer, &equipment, input, quote)?;

        info!(
            booking_id = %booking.id,
            equipment_id = %equipment.id,
            dates = %booking.dates,
            total = booking.quote.total,
            "booking requested"
        );
        self.emit(MarketEvent::BookingRequested {
            booking_id: booking.id,
            equipment_id: equipment.id,
            total: booking.quote.total,
        });
        self.notify(
            booking.operator,
            "New booking request",
            format!("{} requested for {}", equipment.name, booking.dates),
            Some(booking.id),
        );
        self.mark_dirty();
        Ok(booking)
    }

    /// Gets a booking.
    pub fn booking(&self, id: BookingId) -> MarketResult<Booking> {
        self.bookings.require(id).cloned()
    }

    /// Bookings where the user is a party, newest first.
    #[must_use]
    pub fn bookings_for(&self, user: UserId, status: Option<BookingStatus>) -> Vec<Booking> {
        self.bookings
            .for_user(user, status)
            .into_iter()
            .cloned()
            .collect()
    }

    fn ensure_operator(booking: &Booking, actor: UserId) -> MarketResult<()> {
        if booking.operator == actor {
            Ok(())
        } else {
            Err(MarketError::Forbidden(format!(
                "user {actor} is not the operator on booking {}",
                booking.id
            )))
        }
    }

    fn ensure_transition(booking: &Booking, to: BookingStatus) -> MarketResult<()> {
        if booking.status.can_transition_to(&to) {
            Ok(())
        } else {
            Err(MarketError::InvalidStateTransition {
                from: booking.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Accepts a request. Re-checks availability and creates the deposit
    /// payment.
    pub fn confirm(&mut self, id: BookingId, operator: UserId) -> MarketResult<Booking> {
        let booking = self.bookings.require(id)?.clone();
        Self::ensure_operator(&booking, operator)?;
        Self::ensure_transition(&booking, BookingStatus::Confirmed)?;
        let equipment = self.live_equipment(booking.equipment)?.clone();
        Self::ensure_bookable(&equipment)?;
        self.check_availability(&equipment, &booking.dates, Some(id))?;

        let confirmed = self.transition(&booking, BookingStatus::Confirmed, |_| {})?;
        if confirmed.quote.deposit > 0 {
            let payment = self.payments.create(
                id,
                confirmed.farmer,
                PaymentKind::Deposit,
                confirmed.payment_method,
                confirmed.quote.deposit,
            )?;
            self.emit_payment(&payment);
        }
        self.notify(
            confirmed.farmer,
            "Booking confirmed",
            format!(
                "{} is booked for {}. Deposit due: {}",
                equipment.name, confirmed.dates, confirmed.quote.deposit
            ),
            Some(id),
        );
        self.mark_dirty();
        Ok(confirmed)
    }

    /// Starts the job. The equipment becomes `rented`.
    pub fn start(&mut self, id: BookingId, operator: UserId) -> MarketResult<Booking> {
        let booking = self.bookings.require(id)?.clone();
        Self::ensure_operator(&booking, operator)?;
        let started = self.transition(&booking, BookingStatus::InProgress, |b| {
            b.actual_start = Some(today());
        })?;
        self.set_equipment_status_internal(started.equipment, EquipmentStatus::Rented);
        self.notify(started.farmer, "Job started", "The operator has started work", Some(id));
        self.mark_dirty();
        Ok(started)
    }

    /// Finishes the job and creates the operator's payout. The operator may
    /// report the machine hours worked.
    pub fn complete(
        &mut self,
        id: BookingId,
        operator: UserId,
        actual_hours: Option<f64>,
    ) -> MarketResult<Booking> {
        let booking = self.bookings.require(id)?.clone();
        Self::ensure_operator(&booking, operator)?;
        if let Some(hours) = actual_hours {
            booking::validate_hours(hours)?;
        }
        let completed = self.finish_completion(&booking, actual_hours)?;
        self.mark_dirty();
        Ok(completed)
    }

    /// Cancels a booking. The farmer cancels as `cancelled_by_farmer`, the
    /// operator as `cancelled_by_operator`. Collected money is refunded.
    pub fn cancel(&mut self, id: BookingId, actor: UserId, reason: &str) -> MarketResult<Booking> {
        let booking = self.bookings.require(id)?.clone();
        let target = if actor == booking.farmer {
            BookingStatus::CancelledByFarmer
        } else if actor == booking.operator {
            BookingStatus::CancelledByOperator
        } else {
            return Err(MarketError::Forbidden(format!(
                "user {actor} is not a party to booking {id}"
            )));
        };
        let reason = reason.trim().to_string();
        let cancelled = self.transition(&booking, target, |b| {
            b.cancellation_reason = (!reason.is_empty()).then_some(reason);
        })?;
        self.issue_refund(&cancelled)?;
        self.notify(
            cancelled.counterparty(actor),
            "Booking cancelled",
            cancelled
                .cancellation_reason
                .clone()
                .unwrap_or_else(|| "No reason given".to_string()),
            Some(id),
        );
        self.mark_dirty();
        Ok(cancelled)
    }

    /// Raises a dispute. Either party may do so.
    pub fn dispute(&mut self, id: BookingId, actor: UserId, reason: &str) -> MarketResult<Booking> {
        let booking = self.bookings.require(id)?.clone();
        if !booking.is_party(actor) {
            return Err(MarketError::Forbidden(format!(
                "user {actor} is not a party to booking {id}"
            )));
        }
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(MarketError::Validation("dispute reason is required".to_string()));
        }
        let disputed = self.transition(&booking, BookingStatus::Disputed, |b| {
            b.dispute_reason = Some(reason);
        })?;
        self.notify(
            disputed.counterparty(actor),
            "Booking disputed",
            disputed.dispute_reason.clone().unwrap_or_default(),
            Some(id),
        );
        self.mark_dirty();
        Ok(disputed)
    }

    /// Settles a dispute. Admin only.
    pub fn resolve_dispute(
        &mut self,
        id: BookingId,
        admin: UserId,
        resolution: DisputeResolution,
    ) -> MarketResult<Booking> {
        self.users.require_role(admin, Role::Admin)?;
        let booking = self.bookings.require(id)?.clone();
        if booking.status != BookingStatus::Disputed {
            return Err(MarketError::InvalidStateTransition {
                from: booking.status.to_string(),
                to: match resolution {
                    DisputeResolution::Complete => BookingStatus::Completed,
                    DisputeResolution::Cancel => BookingStatus::CancelledByOperator,
                }
                .to_string(),
            });
        }
        let resolved = match resolution {
            DisputeResolution::Complete => self.finish_completion(&booking, None)?,
            DisputeResolution::Cancel => {
                let cancelled = self.transition(&booking, BookingStatus::CancelledByOperator, |b| {
                    b.cancellation_reason = Some("dispute resolved in farmer's favour".to_string());
                })?;
                self.release_equipment(cancelled.equipment);
                self.issue_refund(&cancelled)?;
                cancelled
            }
        };
        for party in [resolved.farmer, resolved.operator] {
            self.notify(
                party,
                "Dispute resolved",
                format!("Booking is now {}", resolved.status),
                Some(id),
            );
        }
        self.mark_dirty();
        Ok(resolved)
    }

    fn transition(
        &mut self,
        booking: &Booking,
        to: BookingStatus,
        update: impl FnOnce(&mut Booking),
    ) -> MarketResult<Booking> {
        let moved = self.bookings.transition(booking.id, to)?;
        update(moved);
        let moved = moved.clone();
        info!(
            booking_id = %booking.id,
            from = %booking.status,
            to = %to,
            "booking transitioned"
        );
        self.emit(MarketEvent::BookingStatusChanged {
            booking_id: booking.id,
            from: booking.status,
            to,
        });
        Ok(moved)
    }

    fn set_equipment_status_internal(&mut self, id: EquipmentId, status: EquipmentStatus) {
        self.catalog.set_status_internal(id, status);
        self.emit(MarketEvent::EquipmentStatusChanged {
            equipment_id: id,
            status,
        });
    }

    /// Puts rented equipment back on the market.
    fn release_equipment(&mut self, id: EquipmentId) {
        if self
            .catalog
            .get(id)
            .is_some_and(|e| e.status == EquipmentStatus::Rented)
        {
            self.set_equipment_status_internal(id, EquipmentStatus::Available);
        }
    }

    fn finish_completion(
        &mut self,
        booking: &Booking,
        actual_hours: Option<f64>,
    ) -> MarketResult<Booking> {
        let completed = self.transition(booking, BookingStatus::Completed, |b| {
            b.actual_end = Some(today());
            b.actual_hours = actual_hours;
        })?;
        self.release_equipment(completed.equipment);
        self.users.record_completed_job(completed.operator);

        let gross = self.payments.collected(completed.id);
        let payout =
            self.payouts
                .create(completed.id, completed.operator, gross, self.config.platform_fee)?;
        info!(
            booking_id = %completed.id,
            payout_id = %payout.id,
            gross = payout.split.gross,
            fee = payout.split.fee,
            net = payout.split.net,
            "payout created"
        );
        self.emit_payout(&payout);
        self.notify(
            completed.farmer,
            "Job completed",
            "Please rate your operator",
            Some(completed.id),
        );
        self.notify(
            completed.operator,
            "Payout pending",
            format!("{} will be released after review", payout.split.net),
            Some(completed.id),
        );
        Ok(completed)
    }

    /// Creates a refund for money collected and not yet being returned.
    fn issue_refund(&mut self, booking: &Booking) -> MarketResult<Option<Payment>> {
        let due = self
            .payments
            .collected(booking.id)
            .saturating_sub(self.payments.pending_refunds(booking.id));
        if due == 0 {
            return Ok(None);
        }
        let refund = self.payments.create(
            booking.id,
            booking.farmer,
            PaymentKind::Refund,
            booking.payment_method,
            due,
        )?;
        info!(booking_id = %booking.id, payment_id = %refund.id, amount = due, "refund issued");
        self.emit_payment(&refund);
        Ok(Some(refund))
    }

    // Payments

    /// Starts a farmer payment: the deposit (after a failed attempt) or
    /// the outstanding balance.
    pub fn initiate_payment(
        &mut self,
        booking_id: BookingId,
        payer: UserId,
        kind: PaymentKind,
        method: PaymentMethod,
    ) -> MarketResult<Payment> {
        let booking = self.bookings.require(booking_id)?.clone();
        if payer != booking.farmer {
            return Err(MarketError::Forbidden(format!(
                "only the farmer pays for booking {booking_id}"
            )));
        }
        if !matches!(
            booking.status,
            BookingStatus::Confirmed | BookingStatus::InProgress | BookingStatus::Completed
        ) {
            return Err(MarketError::Validation(format!(
                "booking {booking_id} is {} and accepts no payments",
                booking.status
            )));
        }

        if let Some(payout) = self.payouts.for_booking(booking_id) {
            if payout.state != PayoutState::Pending {
                return Err(MarketError::Conflict(format!(
                    "payout {} for booking {booking_id} is already {}",
                    payout.id, payout.state
                )));
            }
        }

        let amount = match kind {
            PaymentKind::Refund => {
                return Err(MarketError::Validation(
                    "refunds are issued by the marketplace".to_string(),
                ));
            }
            PaymentKind::Deposit => {
                if self.payments.has_succeeded(booking_id, PaymentKind::Deposit) {
                    return Err(MarketError::Conflict("deposit already paid".to_string()));
                }
                booking.quote.deposit
            }
            PaymentKind::Final => booking
                .quote
                .total
                .saturating_sub(self.payments.paid_in(booking_id))
                .saturating_sub(self.payments.pending_inbound(booking_id)),
        };
        if self.payments.pending_of_kind(booking_id, kind).is_some() {
            return Err(MarketError::Conflict(format!(
                "a {kind} payment is already pending"
            )));
        }
        if amount == 0 {
            return Err(MarketError::Conflict(format!(
                "nothing outstanding on booking {booking_id}"
            )));
        }

        let payment = self
            .payments
            .create(booking_id, payer, kind, method, amount)?;
        info!(
            booking_id = %booking_id,
            payment_id = %payment.id,
            kind = %kind,
            amount,
            "payment initiated"
        );
        self.emit_payment(&payment);
        self.mark_dirty();
        Ok(payment)
    }

    /// Applies a gateway callback. Replays are no-ops.
    pub fn handle_callback(
        &mut self,
        callback: &GatewayCallback,
    ) -> MarketResult<(CallbackOutcome, Payment)> {
        let (outcome, payment) = self.payments.apply_callback(callback)?;
        if outcome == CallbackOutcome::Duplicate {
            debug!(payment_id = %payment.id, "duplicate gateway callback");
            return Ok((outcome, payment));
        }
        info!(
            payment_id = %payment.id,
            booking_id = %payment.booking,
            state = %payment.state,
            "payment settled"
        );
        self.emit_payment(&payment);
        if payment.state == PaymentState::Succeeded {
            self.settle_payment(&payment)?;
        } else {
            if payment.kind == PaymentKind::Refund {
                warn!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking,
                    amount = payment.amount,
                    "refund failed, awaiting retry"
                );
            }
            self.notify(
                payment.payer,
                "Payment failed",
                payment
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| format!("{} payment did not go through", payment.kind)),
                Some(payment.booking),
            );
        }
        self.mark_dirty();
        Ok((outcome, payment))
    }

    fn settle_payment(&mut self, payment: &Payment) -> MarketResult<()> {
        let booking = self.bookings.require(payment.booking)?.clone();
        let collected = self.payments.collected(booking.id);
        let status = match payment.kind {
            PaymentKind::Refund if collected == 0 => PaymentStatus::Refunded,
            PaymentKind::Refund => booking.payment_status,
            PaymentKind::Deposit | PaymentKind::Final if collected >= booking.quote.total => {
                PaymentStatus::FullyPaid
            }
            PaymentKind::Deposit | PaymentKind::Final => PaymentStatus::DepositPaid,
        };
        {
            let stored = self.bookings.require_mut(booking.id)?;
            stored.payment_status = status;
            stored.updated_at = Utc::now();
        }

        if payment.kind != PaymentKind::Refund {
            if booking.status.is_cancelled() {
                self.issue_refund(&booking)?;
            } else if booking.status == BookingStatus::Completed
                && self.payouts.refresh_gross(booking.id, collected)
            {
                if let Some(payout) = self.payouts.for_booking(booking.id).cloned() {
                    self.emit_payout(&payout);
                }
            }
            self.notify(
                booking.operator,
                "Payment received",
                format!("{} received for {}", payment.amount, booking.dates),
                Some(booking.id),
            );
        }
        Ok(())
    }

    /// Issues a new refund for money still held on a cancelled booking,
    /// typically after the gateway failed the previous one. Admin only.
    pub fn retry_refund(&mut self, booking_id: BookingId, admin: UserId) -> MarketResult<Payment> {
        self.users.require_role(admin, Role::Admin)?;
        let booking = self.bookings.require(booking_id)?.clone();
        if !booking.status.is_cancelled() {
            return Err(MarketError::Validation(format!(
                "booking {booking_id} is {} and owes no refund",
                booking.status
            )));
        }
        let refund = self.issue_refund(&booking)?.ok_or_else(|| {
            MarketError::Conflict(format!("nothing left to refund on booking {booking_id}"))
        })?;
        self.mark_dirty();
        Ok(refund)
    }

    /// Payments on a booking, oldest first.
    pub fn payments_for(&self, booking: BookingId) -> MarketResult<Vec<Payment>> {
        self.bookings.require(booking)?;
        Ok(self
            .payments
            .for_booking(booking)
            .into_iter()
            .cloned()
            .collect())
    }

    // Payouts

    /// Gets a payout.
    pub fn payout(&self, id: PayoutId) -> MarketResult<Payout> {
        self.payouts
            .get(id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("payout", id))
    }

    /// The payout for a booking, once completed.
    #[must_use]
    pub fn payout_for_booking(&self, booking: BookingId) -> Option<Payout> {
        self.payouts.for_booking(booking).cloned()
    }

    /// Payouts owed to an operator, newest first.
    #[must_use]
    pub fn payouts_for(&self, operator: UserId) -> Vec<Payout> {
        self.payouts
            .for_operator(operator)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Sends a payout. Admin only; the booking must be completed and have
    /// no farmer payment still awaiting the gateway.
    pub fn release_payout(&mut self, id: PayoutId, admin: UserId) -> MarketResult<Payout> {
        self.users.require_role(admin, Role::Admin)?;
        let booking_id = self.payout(id)?.booking;
        let status = self.bookings.require(booking_id)?.status;
        let awaiting = self.payments.pending_inbound(booking_id);
        if awaiting > 0 {
            return Err(MarketError::Conflict(format!(
                "booking {booking_id} has {awaiting} in payments awaiting the gateway"
            )));
        }
        let operator = self.payout(id)?.operator;
        let method = self.users.payout_method(operator);
        let payout = self.payouts.release(id, status, method)?.clone();
        info!(
            payout_id = %id,
            booking_id = %booking_id,
            net = payout.split.net,
            method = %method,
            "payout released"
        );
        self.emit_payout(&payout);
        self.mark_dirty();
        Ok(payout)
    }

    /// Records a confirmed transfer. Admin only.
    pub fn mark_payout_paid(
        &mut self,
        id: PayoutId,
        admin: UserId,
        reference: &str,
    ) -> MarketResult<Payout> {
        self.users.require_role(admin, Role::Admin)?;
        let payout = self.payouts.mark_paid(id, reference)?.clone();
        info!(payout_id = %id, reference, "payout paid");
        self.emit_payout(&payout);
        self.notify(
            payout.operator,
            "Payout sent",
            format!("{} sent, reference {reference}", payout.split.net),
            Some(payout.booking),
        );
        self.mark_dirty();
        Ok(payout)
    }

    /// Records a failed transfer. Admin only.
    pub fn mark_payout_failed(
        &mut self,
        id: PayoutId,
        admin: UserId,
        reason: &str,
    ) -> MarketResult<Payout> {
        self.users.require_role(admin, Role::Admin)?;
        let payout = self.payouts.mark_failed(id, reason)?.clone();
        warn!(payout_id = %id, reason, "payout failed");
        self.emit_payout(&payout);
        self.mark_dirty();
        Ok(payout)
    }

    // Reviews

    /// Reviews the other party on a completed booking.
    pub fn submit_review(
        &mut self,
        booking_id: BookingId,
        reviewer: UserId,
        input: NewReview,
    ) -> MarketResult<Review> {
        let booking = self.bookings.require(booking_id)?.clone();
        let review = self.reviews.submit(&booking, reviewer, input)?;
        if review.direction == ReviewDirection::FarmerToOperator {
            self.users.record_operator_rating(review.reviewee, review.rating);
        }
        info!(
            booking_id = %booking_id,
            review_id = %review.id,
            rating = review.rating,
            "review submitted"
        );
        self.emit(MarketEvent::ReviewSubmitted {
            review_id: review.id,
            booking_id,
            reviewee: review.reviewee,
            rating: review.rating,
        });
        self.notify(
            review.reviewee,
            "New review",
            format!("You were rated {}/5", review.rating),
            Some(booking_id),
        );
        self.mark_dirty();
        Ok(review)
    }

    /// Reviews a user received.
    pub fn reviews_for_user(&self, user: UserId) -> MarketResult<Vec<Review>> {
        self.users.require(user)?;
        Ok(self.reviews.received_by(user).into_iter().cloned().collect())
    }

    /// Reviews on a booking.
    pub fn reviews_for_booking(&self, booking: BookingId) -> MarketResult<Vec<Review>> {
        self.bookings.require(booking)?;
        Ok(self.reviews.for_booking(booking).into_iter().cloned().collect())
    }

    // Notifications

    /// A user's notifications, newest first.
    pub fn notifications(&self, user: UserId, unread_only: bool) -> MarketResult<Vec<Notification>> {
        self.users.require(user)?;
        Ok(self
            .notifications
            .for_user(user, unread_only)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Marks a notification read.
    pub fn mark_notification_read(
        &mut self,
        id: NotificationId,
        user: UserId,
    ) -> MarketResult<Notification> {
        let notification = self.notifications.mark_read(id, user)?.clone();
        self.mark_dirty();
        Ok(notification)
    }

    // Support

    fn emit_ticket(&mut self, ticket: &SupportTicket) {
        self.emit(MarketEvent::TicketUpdated {
            ticket_id: ticket.id,
            status: ticket.status,
            assigned_to: ticket.assigned_to,
        });
    }

    /// Raises a support ticket. A ticket about a booking may only come from
    /// one of its parties or an admin.
    pub fn open_ticket(&mut self, submitter: UserId, input: NewTicket) -> MarketResult<SupportTicket> {
        let role = self.users.require(submitter)?.role;
        if let Some(booking_id) = input.booking {
            let booking = self.bookings.require(booking_id)?;
            if !booking.is_party(submitter) && role != Role::Admin {
                return Err(MarketError::Forbidden(format!(
                    "user {submitter} is not a party to booking {booking_id}"
                )));
            }
        }
        let ticket = self.support.open(submitter, input)?.clone();
        info!(
            ticket_id = %ticket.id,
            submitter = %submitter,
            priority = ?ticket.priority,
            "support ticket opened"
        );
        self.emit(MarketEvent::TicketOpened {
            ticket_id: ticket.id,
            booking_id: ticket.booking,
            priority: ticket.priority,
        });
        self.notify(
            submitter,
            "Ticket received",
            format!("We will get back to you about \"{}\"", ticket.subject),
            ticket.booking,
        );
        self.mark_dirty();
        Ok(ticket)
    }

    /// Gets a ticket.
    pub fn ticket(&self, id: TicketId) -> MarketResult<SupportTicket> {
        self.support.require(id).cloned()
    }

    /// Tickets a user raised, newest first.
    pub fn user_tickets(&self, user: UserId) -> MarketResult<Vec<SupportTicket>> {
        self.users.require(user)?;
        Ok(self
            .support
            .for_submitter(user)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The staff queue, most urgent first. Admin only.
    pub fn ticket_queue(
        &self,
        admin: UserId,
        status: Option<TicketStatus>,
    ) -> MarketResult<Vec<SupportTicket>> {
        self.users.require_role(admin, Role::Admin)?;
        Ok(self.support.queue(status).into_iter().cloned().collect())
    }

    /// Hands a ticket to a staff member. Admin only, and the assignee must
    /// be an admin too.
    pub fn assign_ticket(
        &mut self,
        id: TicketId,
        admin: UserId,
        assignee: UserId,
    ) -> MarketResult<SupportTicket> {
        self.users.require_role(admin, Role::Admin)?;
        self.users.require_role(assignee, Role::Admin)?;
        let ticket = self.support.assign(id, assignee)?.clone();
        info!(ticket_id = %id, assignee = %assignee, "support ticket assigned");
        self.emit_ticket(&ticket);
        self.mark_dirty();
        Ok(ticket)
    }

    /// Moves a ticket along its lifecycle. Admins may make any valid move;
    /// the submitter may only close it or reopen a resolved ticket.
    pub fn set_ticket_status(
        &mut self,
        id: TicketId,
        actor: UserId,
        status: TicketStatus,
    ) -> MarketResult<SupportTicket> {
        let role = self.users.require(actor)?.role;
        let submitter = self.support.require(id)?.submitter;
        let allowed = role == Role::Admin
            || (actor == submitter && matches!(status, TicketStatus::Closed | TicketStatus::Open));
        if !allowed {
            return Err(MarketError::Forbidden(format!(
                "user {actor} may not move ticket {id} to {status}"
            )));
        }
        let ticket = self.support.transition(id, status)?.clone();
        info!(ticket_id = %id, status = %status, "support ticket updated");
        self.emit_ticket(&ticket);
        if actor != submitter {
            self.notify(
                submitter,
                "Ticket updated",
                format!("\"{}\" is now {status}", ticket.subject),
                ticket.booking,
            );
        }
        self.mark_dirty();
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::JobDetails;
    use crate::catalog::tests::tractor_input;
    use crate::payout::PayoutMethod;
    use crate::support::TicketPriority;
    use agri_proto::GeoPoint;
    use chrono::Days;
    use proptest::prelude::*;

    struct World {
        market: Marketplace,
        admin: UserId,
        farmer: UserId,
        other_farmer: UserId,
        operator: UserId,
        equipment: EquipmentId,
    }

    fn user(market: &mut Marketplace, role: Role, phone: &str) -> UserId {
        market
            .register_user(NewUser {
                role,
                full_name: format!("{role} {phone}"),
                phone_number: phone.to_string(),
                national_id: None,
            })
            .unwrap()
            .id
    }

    fn world() -> World {
        let mut market = Marketplace::in_memory(MarketConfig::default());
        let admin = user(&mut market, Role::Admin, "+254700000000");
        let farmer = user(&mut market, Role::Farmer, "+254711111111");
        let other_farmer = user(&mut market, Role::Farmer, "+254722222222");
        let operator = user(&mut market, Role::Operator, "+254733333333");
        let category = market.add_category("Tractor", "").unwrap().id;
        let equipment = market
            .list_equipment(operator, tractor_input(category))
            .unwrap()
            .id;
        World {
            market,
            admin,
            farmer,
            other_farmer,
            operator,
            equipment,
        }
    }

    fn future(days: u64) -> NaiveDate {
        today() + Days::new(days)
    }

    fn range(from: u64, to: u64) -> DateRange {
        DateRange::new(future(from), future(to)).unwrap()
    }

    impl World {
        fn request(&mut self, farmer: UserId, dates: DateRange) -> MarketResult<Booking> {
            let equipment_id = self.equipment;
            self.market.request_booking(farmer, booking_input(equipment_id, dates))
        }
    }

    fn booking_input(equipment_id: EquipmentId, dates: DateRange) -> NewBooking {
        NewBooking {
            equipment_id,
            dates,
            job: JobDetails {
                description: "Plough and harrow".to_string(),
                land_size_acres: 4.0,
                crop_type: Some("maize".to_string()),
                farm_county: "Nakuru".to_string(),
                farm_location: Some(GeoPoint { lat: -0.3, lon: 36.1 }),
                farm_directions: None,
                estimated_hours: None,
            },
            payment_method: PaymentMethod::Mpesa,
            notes: None,
        }
    }

    fn settle(w: &mut World, payment: &Payment, tx: &str) {
        w.market
            .handle_callback(&GatewayCallback {
                payment_id: payment.id,
                transaction_id: tx.to_string(),
                success: true,
                reason: None,
            })
            .unwrap();
    }

    fn pending_payment(w: &World, booking: BookingId, kind: PaymentKind) -> Payment {
        w.market
            .payments_for(booking)
            .unwrap()
            .into_iter()
            .find(|p| p.kind == kind && p.state == PaymentState::Pending)
            .unwrap()
    }

    #[test]
    fn full_rental_lifecycle() {
        let mut w = world();
        let booking = w.request(w.farmer, range(3, 5)).unwrap();
        assert_eq!(booking.status, BookingStatus::Requested);
        assert_eq!(booking.quote.days, 3);
        assert_eq!(booking.quote.total, 2_400_000);
        assert_eq!(booking.quote.deposit, 720_000);

        let confirmed = w.market.confirm(booking.id, w.operator).unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        assert_eq!(deposit.amount, 720_000);
        settle(&mut w, &deposit, "MP-DEP-1");
        assert_eq!(
            w.market.booking(booking.id).unwrap().payment_status,
            PaymentStatus::DepositPaid
        );

        w.market.start(booking.id, w.operator).unwrap();
        assert_eq!(
            w.market.equipment(w.equipment).unwrap().status,
            EquipmentStatus::Rented
        );

        let balance = w
            .market
            .initiate_payment(booking.id, w.farmer, PaymentKind::Final, PaymentMethod::Mpesa)
            .unwrap();
        assert_eq!(balance.amount, 1_680_000);
        settle(&mut w, &balance, "MP-FIN-1");
        assert_eq!(
            w.market.booking(booking.id).unwrap().payment_status,
            PaymentStatus::FullyPaid
        );

        assert!(matches!(
            w.market.complete(booking.id, w.operator, Some(-2.0)),
            Err(MarketError::Validation(_))
        ));
        let completed = w.market.complete(booking.id, w.operator, Some(7.5)).unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);
        assert_eq!(completed.actual_hours, Some(7.5));
        assert!(completed.actual_start.is_some());
        assert!(completed.actual_end.is_some());
        assert_eq!(
            w.market.equipment(w.equipment).unwrap().status,
            EquipmentStatus::Available
        );

        let payout = w.market.payout_for_booking(booking.id).unwrap();
        assert_eq!(payout.split.gross, 2_400_000);
        assert_eq!(payout.split.fee, 240_000);
        assert_eq!(payout.split.net, 2_160_000);

        let released = w.market.release_payout(payout.id, w.admin).unwrap();
        assert_eq!(released.state, PayoutState::Processing);
        assert_eq!(released.method, Some(PayoutMethod::MobileMoney));
        let paid = w.market.mark_payout_paid(payout.id, w.admin, "B2C-001").unwrap();
        assert_eq!(paid.state, PayoutState::Paid);

        w.market
            .submit_review(
                booking.id,
                w.farmer,
                NewReview {
                    rating: 4,
                    punctuality: Some(5),
                    quality: Some(4),
                    comment: "Good work".to_string(),
                },
            )
            .unwrap();
        assert_eq!(w.market.reviews_for_user(w.operator).unwrap().len(), 1);

        let events = w.market.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, MarketEvent::ReviewSubmitted { rating: 4, .. })));
        assert!(w.market.take_events().is_empty());
    }

    #[test]
    fn review_updates_operator_rating() {
        let mut w = world();
        w.market
            .set_operator_profile(
                w.operator,
                w.operator,
                OperatorDetails {
                    county: "Nakuru".to_string(),
                    ..OperatorDetails::default()
                },
            )
            .unwrap();
        let booking = w.request(w.farmer, range(1, 1)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        w.market.start(booking.id, w.operator).unwrap();
        w.market.complete(booking.id, w.operator, None).unwrap();
        w.market
            .submit_review(
                booking.id,
                w.farmer,
                NewReview {
                    rating: 5,
                    punctuality: None,
                    quality: None,
                    comment: String::new(),
                },
            )
            .unwrap();

        let profile = w.market.user(w.operator).unwrap().operator_profile.unwrap();
        assert_eq!(profile.average_rating(), 500);
        assert_eq!(profile.total_jobs_completed, 1);

        let again = w.market.submit_review(
            booking.id,
            w.farmer,
            NewReview {
                rating: 1,
                punctuality: None,
                quality: None,
                comment: String::new(),
            },
        );
        assert!(matches!(again, Err(MarketError::DuplicateReview { .. })));
    }

    #[test]
    fn overlapping_confirmations_conflict() {
        let mut w = world();
        let first = w.request(w.farmer, range(10, 14)).unwrap();
        let second = w.request(w.other_farmer, range(14, 16)).unwrap();

        w.market.confirm(first.id, w.operator).unwrap();
        let err = w.market.confirm(second.id, w.operator).unwrap_err();
        assert!(matches!(
            err,
            MarketError::DoubleBooking { conflicting, .. } if conflicting == first.id
        ));
        assert_eq!(
            w.market.booking(second.id).unwrap().status,
            BookingStatus::Requested
        );

        // New requests over held dates are refused up front.
        assert!(matches!(
            w.request(w.other_farmer, range(12, 12)),
            Err(MarketError::DoubleBooking { .. })
        ));
        // Adjacent dates are fine.
        assert!(w.request(w.other_farmer, range(15, 16)).is_ok());
    }

    #[test]
    fn request_validation() {
        let mut w = world();
        let past = DateRange::new(today() - Days::new(2), today()).unwrap();
        assert!(matches!(
            w.request(w.farmer, past),
            Err(MarketError::Validation(_))
        ));
        // Operators cannot request.
        assert!(matches!(
            w.request(w.operator, range(1, 2)),
            Err(MarketError::Forbidden(_))
        ));

        w.market
            .set_equipment_status(w.equipment, w.operator, EquipmentStatus::Maintenance)
            .unwrap();
        assert!(matches!(
            w.request(w.farmer, range(1, 2)),
            Err(MarketError::Unavailable { .. })
        ));
    }

    #[test]
    fn blackouts_block_requests_and_cannot_cover_bookings() {
        let mut w = world();
        w.market
            .add_blackout(
                w.equipment,
                w.operator,
                Blackout {
                    range: range(20, 22),
                    reason: Some("servicing".to_string()),
                },
            )
            .unwrap();
        assert!(matches!(
            w.request(w.farmer, range(22, 23)),
            Err(MarketError::Unavailable { .. })
        ));

        let booking = w.request(w.farmer, range(5, 6)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let err = w
            .market
            .add_blackout(
                w.equipment,
                w.operator,
                Blackout {
                    range: range(6, 7),
                    reason: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[test]
    fn cancellation_refunds_collected_money() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        settle(&mut w, &deposit, "MP-DEP-9");

        let cancelled = w
            .market
            .cancel(booking.id, w.farmer, "rain delayed planting")
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::CancelledByFarmer);
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some("rain delayed planting")
        );

        let refund = pending_payment(&w, booking.id, PaymentKind::Refund);
        assert_eq!(refund.amount, deposit.amount);
        settle(&mut w, &refund, "MP-REF-9");
        assert_eq!(
            w.market.booking(booking.id).unwrap().payment_status,
            PaymentStatus::Refunded
        );

        // Cancelled bookings free their dates.
        let rebook = w.request(w.other_farmer, range(2, 3)).unwrap();
        assert!(w.market.confirm(rebook.id, w.operator).is_ok());
    }

    #[test]
    fn late_deposit_on_cancelled_booking_is_refunded() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        w.market.cancel(booking.id, w.operator, "tractor broke").unwrap();
        assert!(w
            .market
            .payments_for(booking.id)
            .unwrap()
            .iter()
            .all(|p| p.kind != PaymentKind::Refund));

        settle(&mut w, &deposit, "MP-LATE-1");
        let refund = pending_payment(&w, booking.id, PaymentKind::Refund);
        assert_eq!(refund.amount, deposit.amount);
    }

    #[test]
    fn duplicate_callbacks_leave_state_unchanged() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        let callback = GatewayCallback {
            payment_id: deposit.id,
            transaction_id: "MP-DUP".to_string(),
            success: true,
            reason: None,
        };
        let (first, _) = w.market.handle_callback(&callback).unwrap();
        assert_eq!(first, CallbackOutcome::Applied);
        let before = w.market.booking(booking.id).unwrap();
        let notes_before = w.market.notifications(w.operator, false).unwrap().len();
        w.market.take_events();

        let (second, payment) = w.market.handle_callback(&callback).unwrap();
        assert_eq!(second, CallbackOutcome::Duplicate);
        assert_eq!(payment.state, PaymentState::Succeeded);
        assert_eq!(w.market.booking(booking.id).unwrap(), before);
        assert_eq!(
            w.market.notifications(w.operator, false).unwrap().len(),
            notes_before
        );
        assert!(w.market.take_events().is_empty());
    }

    #[test]
    fn failed_deposit_can_be_retried() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);

        let retry_while_pending =
            w.market
                .initiate_payment(booking.id, w.farmer, PaymentKind::Deposit, PaymentMethod::Mpesa);
        assert!(matches!(retry_while_pending, Err(MarketError::Conflict(_))));

        w.market
            .handle_callback(&GatewayCallback {
                payment_id: deposit.id,
                transaction_id: "MP-FAIL".to_string(),
                success: false,
                reason: Some("timeout".to_string()),
            })
            .unwrap();
        let retry = w
            .market
            .initiate_payment(
                booking.id,
                w.farmer,
                PaymentKind::Deposit,
                PaymentMethod::AirtelMoney,
            )
            .unwrap();
        assert_eq!(retry.amount, deposit.amount);
        assert_eq!(retry.method, PaymentMethod::AirtelMoney);

        assert!(matches!(
            w.market.initiate_payment(
                booking.id,
                w.other_farmer,
                PaymentKind::Final,
                PaymentMethod::Mpesa
            ),
            Err(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn payout_not_released_before_completion() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        w.market.start(booking.id, w.operator).unwrap();
        w.market
            .dispute(booking.id, w.farmer, "half the field left unploughed")
            .unwrap();
        assert!(w.market.payout_for_booking(booking.id).is_none());

        assert!(matches!(
            w.market
                .resolve_dispute(booking.id, w.farmer, DisputeResolution::Complete),
            Err(MarketError::Forbidden(_))
        ));
        let resolved = w
            .market
            .resolve_dispute(booking.id, w.admin, DisputeResolution::Complete)
            .unwrap();
        assert_eq!(resolved.status, BookingStatus::Completed);
        let payout = w.market.payout_for_booking(booking.id).unwrap();
        assert_eq!(payout.split.gross, 0);
        assert!(w.market.release_payout(payout.id, w.operator).is_err());

        // The deposit is still with the gateway.
        assert!(matches!(
            w.market.release_payout(payout.id, w.admin),
            Err(MarketError::Conflict(_))
        ));
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        fail(&mut w, &deposit, "MP-D-LOST");
        assert!(w.market.release_payout(payout.id, w.admin).is_ok());
    }

    fn fail(w: &mut World, payment: &Payment, tx: &str) {
        w.market
            .handle_callback(&GatewayCallback {
                payment_id: payment.id,
                transaction_id: tx.to_string(),
                success: false,
                reason: Some("wallet unreachable".to_string()),
            })
            .unwrap();
    }

    /// Deposit paid, job done, payout created and still pending.
    fn completed_with_deposit(w: &mut World) -> (Booking, Payment) {
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(w, booking.id, PaymentKind::Deposit);
        settle(w, &deposit, "MP-DEP-C");
        w.market.start(booking.id, w.operator).unwrap();
        w.market.complete(booking.id, w.operator, None).unwrap();
        (booking, deposit)
    }

    #[test]
    fn balance_after_release_is_refused() {
        let mut w = world();
        let (booking, deposit) = completed_with_deposit(&mut w);
        let payout = w.market.payout_for_booking(booking.id).unwrap();
        assert_eq!(payout.split.gross, deposit.amount);
        w.market.release_payout(payout.id, w.admin).unwrap();

        let late = w.market.initiate_payment(
            booking.id,
            w.farmer,
            PaymentKind::Final,
            PaymentMethod::Mpesa,
        );
        assert!(matches!(late, Err(MarketError::Conflict(_))));
        assert_eq!(w.market.payments_for(booking.id).unwrap().len(), 1);
    }

    #[test]
    fn release_waits_for_pending_balance() {
        let mut w = world();
        let (booking, _) = completed_with_deposit(&mut w);
        let payout = w.market.payout_for_booking(booking.id).unwrap();
        let balance = w
            .market
            .initiate_payment(booking.id, w.farmer, PaymentKind::Final, PaymentMethod::Mpesa)
            .unwrap();
        assert_eq!(balance.amount, 1_120_000);

        assert!(matches!(
            w.market.release_payout(payout.id, w.admin),
            Err(MarketError::Conflict(_))
        ));

        settle(&mut w, &balance, "MP-FIN-C");
        let refreshed = w.market.payout_for_booking(booking.id).unwrap();
        assert_eq!(refreshed.split.gross, booking.quote.total);
        let released = w.market.release_payout(payout.id, w.admin).unwrap();
        assert_eq!(released.split.gross, w.market.payments.collected(booking.id));
    }

    #[test]
    fn failed_refund_can_be_retried() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        settle(&mut w, &deposit, "MP-DEP-R");
        w.market.cancel(booking.id, w.farmer, "").unwrap();

        let refund = pending_payment(&w, booking.id, PaymentKind::Refund);
        fail(&mut w, &refund, "MP-REF-FAIL");
        assert_eq!(w.market.payments.collected(booking.id), deposit.amount);

        assert!(matches!(
            w.market.retry_refund(booking.id, w.farmer),
            Err(MarketError::Forbidden(_))
        ));
        let retry = w.market.retry_refund(booking.id, w.admin).unwrap();
        assert_eq!(retry.kind, PaymentKind::Refund);
        assert_eq!(retry.amount, deposit.amount);

        // One refund in flight is enough.
        assert!(matches!(
            w.market.retry_refund(booking.id, w.admin),
            Err(MarketError::Conflict(_))
        ));

        settle(&mut w, &retry, "MP-REF-OK");
        assert_eq!(w.market.payments.collected(booking.id), 0);
        assert_eq!(
            w.market.booking(booking.id).unwrap().payment_status,
            PaymentStatus::Refunded
        );
    }

    #[test]
    fn retry_refund_needs_cancelled_booking() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        assert!(matches!(
            w.market.retry_refund(booking.id, w.admin),
            Err(MarketError::Validation(_))
        ));
    }

    #[test]
    fn payout_settlement_is_admin_only() {
        let mut w = world();
        let (booking, _) = completed_with_deposit(&mut w);
        let payout = w.market.payout_for_booking(booking.id).unwrap();
        w.market.release_payout(payout.id, w.admin).unwrap();

        assert!(matches!(
            w.market.mark_payout_paid(payout.id, w.operator, "B2C-SELF"),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            w.market.mark_payout_failed(payout.id, w.farmer, "spite"),
            Err(MarketError::Forbidden(_))
        ));
        let failed = w
            .market
            .mark_payout_failed(payout.id, w.admin, "wallet limit")
            .unwrap();
        assert_eq!(failed.state, PayoutState::Failed);
    }

    #[test]
    fn blackout_by_stranger_is_forbidden_before_conflict() {
        let mut w = world();
        let booking = w.request(w.farmer, range(5, 6)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();

        let err = w
            .market
            .add_blackout(
                w.equipment,
                w.farmer,
                Blackout {
                    range: range(5, 6),
                    reason: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
    }

    #[test]
    fn confirm_rechecks_equipment_status() {
        let mut w = world();
        let booking = w.request(w.farmer, range(4, 5)).unwrap();
        w.market
            .set_equipment_status(w.equipment, w.operator, EquipmentStatus::Maintenance)
            .unwrap();

        assert!(matches!(
            w.market.confirm(booking.id, w.operator),
            Err(MarketError::Unavailable { .. })
        ));
        assert_eq!(
            w.market.booking(booking.id).unwrap().status,
            BookingStatus::Requested
        );
        assert!(w.market.payments_for(booking.id).unwrap().is_empty());
    }

    #[test]
    fn dispute_cancel_refunds_and_frees_equipment() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        let deposit = pending_payment(&w, booking.id, PaymentKind::Deposit);
        settle(&mut w, &deposit, "MP-D-1");
        w.market.start(booking.id, w.operator).unwrap();
        w.market.dispute(booking.id, w.operator, "farmer refused access").unwrap();

        let resolved = w
            .market
            .resolve_dispute(booking.id, w.admin, DisputeResolution::Cancel)
            .unwrap();
        assert_eq!(resolved.status, BookingStatus::CancelledByOperator);
        assert_eq!(
            w.market.equipment(w.equipment).unwrap().status,
            EquipmentStatus::Available
        );
        assert_eq!(
            pending_payment(&w, booking.id, PaymentKind::Refund).amount,
            deposit.amount
        );
        assert!(w.market.payout_for_booking(booking.id).is_none());
    }

    #[test]
    fn only_booking_operator_drives_transitions() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        assert!(matches!(
            w.market.confirm(booking.id, w.farmer),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            w.market.start(booking.id, w.operator),
            Err(MarketError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            w.market.cancel(booking.id, w.other_farmer, ""),
            Err(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn remove_equipment_refused_while_active() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        w.market.confirm(booking.id, w.operator).unwrap();
        assert!(matches!(
            w.market.remove_equipment(w.equipment, w.operator),
            Err(MarketError::Conflict(_))
        ));
        w.market.cancel(booking.id, w.operator, "").unwrap();
        w.market.remove_equipment(w.equipment, w.operator).unwrap();
        assert!(matches!(
            w.market.equipment(w.equipment),
            Err(MarketError::NotFound { .. })
        ));
        assert_eq!(w.market.stats().equipment, 0);
    }

    #[test]
    fn transitions_notify_counterparty() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();
        assert_eq!(w.market.notifications(w.operator, true).unwrap().len(), 1);
        w.market.confirm(booking.id, w.operator).unwrap();
        let unread = w.market.notifications(w.farmer, true).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].booking, Some(booking.id));

        w.market.mark_notification_read(unread[0].id, w.farmer).unwrap();
        assert!(w.market.notifications(w.farmer, true).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let booking_id = {
            let mut market = Marketplace::open(dir.path(), MarketConfig::default()).unwrap();
            let farmer = user(&mut market, Role::Farmer, "+254744444444");
            let operator = user(&mut market, Role::Operator, "+254755555555");
            let category = market.add_category("Planter", "").unwrap().id;
            let equipment = market
                .list_equipment(operator, tractor_input(category))
                .unwrap()
                .id;
            let booking_id = market
                .request_booking(
                    farmer,
                    NewBooking {
                        equipment_id: equipment,
                        dates: range(1, 2),
                        job: JobDetails {
                            description: "Plant beans".to_string(),
                            land_size_acres: 1.5,
                            crop_type: None,
                            farm_county: "Nakuru".to_string(),
                            farm_location: None,
                            farm_directions: None,
                            estimated_hours: None,
                        },
                        payment_method: PaymentMethod::Cash,
                        notes: Some("gate code 42".to_string()),
                    },
                )
                .unwrap()
                .id;
            market.flush();
            booking_id
        };

        let reopened = Marketplace::open(dir.path(), MarketConfig::default()).unwrap();
        let booking = reopened.booking(booking_id).unwrap();
        assert_eq!(booking.farmer_notes.as_deref(), Some("gate code 42"));
        assert_eq!(reopened.stats().users, 2);
        assert_eq!(reopened.stats().equipment, 1);
    }

    #[test]
    fn stale_snapshot_never_replaces_newer() {
        let dir = tempfile::tempdir().unwrap();
        let mut market = Marketplace::open(dir.path(), MarketConfig::default()).unwrap();
        user(&mut market, Role::Farmer, "+254766666666");
        let older = market.take_snapshot().unwrap();
        user(&mut market, Role::Operator, "+254777777777");
        let newer = market.take_snapshot().unwrap();
        assert!(market.take_snapshot().is_none());

        newer.write();
        older.write();

        let reopened = Marketplace::open(dir.path(), MarketConfig::default()).unwrap();
        assert_eq!(reopened.stats().users, 2);
    }

    #[test]
    fn in_memory_market_has_no_snapshot() {
        let mut w = world();
        assert!(w.market.take_snapshot().is_none());
    }

    fn ticket(booking: Option<BookingId>, subject: &str) -> NewTicket {
        NewTicket {
            booking,
            subject: subject.to_string(),
            description: "The plough broke on the second acre".to_string(),
            priority: TicketPriority::High,
        }
    }

    #[test]
    fn ticket_on_booking_needs_a_party() {
        let mut w = world();
        let booking = w.request(w.farmer, range(2, 3)).unwrap();

        let err = w
            .market
            .open_ticket(w.other_farmer, ticket(Some(booking.id), "Not mine"))
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
        assert!(matches!(
            w.market.open_ticket(w.farmer, ticket(Some(BookingId::new()), "Ghost")),
            Err(MarketError::NotFound { .. })
        ));

        w.market.take_events();
        let opened = w
            .market
            .open_ticket(w.farmer, ticket(Some(booking.id), "Broken plough"))
            .unwrap();
        assert_eq!(opened.status, TicketStatus::Open);
        assert_eq!(
            w.market.take_events(),
            [MarketEvent::TicketOpened {
                ticket_id: opened.id,
                booking_id: Some(booking.id),
                priority: TicketPriority::High,
            }]
        );
        assert_eq!(w.market.user_tickets(w.farmer).unwrap().len(), 1);
        assert_eq!(w.market.stats().open_tickets, 1);

        // Staff may file on anyone's booking.
        w.market
            .open_ticket(w.admin, ticket(Some(booking.id), "Follow up"))
            .unwrap();
    }

    #[test]
    fn ticket_worked_through_by_staff() {
        let mut w = world();
        let id = w.market.open_ticket(w.farmer, ticket(None, "Refund slow")).unwrap().id;

        assert!(matches!(
            w.market.ticket_queue(w.farmer, None),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            w.market.assign_ticket(id, w.admin, w.operator),
            Err(MarketError::Forbidden(_))
        ));

        let assigned = w.market.assign_ticket(id, w.admin, w.admin).unwrap();
        assert_eq!(assigned.status, TicketStatus::InReview);
        assert_eq!(assigned.assigned_to, Some(w.admin));
        assert_eq!(w.market.ticket_queue(w.admin, Some(TicketStatus::InReview)).unwrap().len(), 1);

        let resolved = w
            .market
            .set_ticket_status(id, w.admin, TicketStatus::Resolved)
            .unwrap();
        assert!(resolved.resolved_at.is_some());
        assert_eq!(w.market.stats().open_tickets, 0);

        let unread = w.market.notifications(w.farmer, true).unwrap();
        assert!(unread.iter().any(|n| n.title == "Ticket updated"));
    }

    #[test]
    fn submitter_may_only_close_or_reopen() {
        let mut w = world();
        let id = w.market.open_ticket(w.farmer, ticket(None, "Late")).unwrap().id;

        assert!(matches!(
            w.market.set_ticket_status(id, w.farmer, TicketStatus::Resolved),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            w.market.set_ticket_status(id, w.operator, TicketStatus::Closed),
            Err(MarketError::Forbidden(_))
        ));

        w.market.set_ticket_status(id, w.admin, TicketStatus::Resolved).unwrap();
        let reopened = w.market.set_ticket_status(id, w.farmer, TicketStatus::Open).unwrap();
        assert!(reopened.resolved_at.is_none());
        let closed = w.market.set_ticket_status(id, w.farmer, TicketStatus::Closed).unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(w.market.ticket(id).unwrap().status, TicketStatus::Closed);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marketplace.json"), b"{ not json").unwrap();
        assert!(matches!(
            Marketplace::open(dir.path(), MarketConfig::default()),
            Err(MarketError::Persistence(_))
        ));
    }

    proptest! {
        #[test]
        fn no_two_active_bookings_overlap(
            ops in proptest::collection::vec((1u64..30, 0u64..5, any::<bool>()), 1..25)
        ) {
            let mut w = world();
            for (start, len, cancel) in ops {
                let farmer = if cancel { w.farmer } else { w.other_farmer };
                let Ok(booking) = w.request(farmer, range(start, start + len)) else {
                    continue;
                };
                if w.market.confirm(booking.id, w.operator).is_ok() && cancel {
                    w.market.cancel(booking.id, farmer, "").unwrap();
                }
            }

            let active: Vec<_> = w
                .market
                .bookings_for(w.operator, None)
                .into_iter()
                .filter(|b| b.status.is_active())
                .collect();
            for (i, a) in active.iter().enumerate() {
                for b in &active[i + 1..] {
                    prop_assert!(!a.dates.overlaps(&b.dates));
                }
            }
        }
    }
}
