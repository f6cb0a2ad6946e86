//! Equipment listings and categories.
//!
//! The catalog only knows about equipment. Role checks against the user
//! directory and overlap checks against the booking ledger happen in
//! [`crate::Marketplace`], which owns both.

use std::collections::HashMap;

use agri_proto::{Amount, CategoryId, DateRange, EquipmentId, GeoPoint, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// A kind of agricultural equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentCategory {
    /// Identifier.
    pub id: CategoryId,
    /// Unique display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

/// What powers the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    /// Diesel engine.
    #[default]
    Diesel,
    /// Petrol engine.
    Petrol,
    /// Battery electric.
    Electric,
    /// Manual or animal-powered.
    Manual,
}

/// Listing status set by the owner or by the booking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    /// Can be booked.
    #[default]
    Available,
    /// Out on a job right now.
    Rented,
    /// Being serviced.
    Maintenance,
    /// Withdrawn by the owner.
    Inactive,
}

impl EquipmentStatus {
    /// Whether new bookings may be made against a unit in this status.
    ///
    /// `Rented` units are bookable for dates after the current job.
    #[must_use]
    pub const fn is_bookable(&self) -> bool {
        matches!(self, Self::Available | Self::Rented)
    }
}

impl std::fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Rented => write!(f, "rented"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// An owner-declared period when the unit cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    /// Days unavailable.
    pub range: DateRange,
    /// Optional note shown to the owner.
    #[serde(default)]
    pub reason: Option<String>,
}

/// A service or repair entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    /// Day the work was done.
    pub service_date: NaiveDate,
    /// Short label, e.g. "oil change".
    pub service_type: String,
    /// Details.
    #[serde(default)]
    pub description: String,
    /// Cost in minor units.
    #[serde(default)]
    pub cost: Amount,
    /// Mechanic or workshop.
    #[serde(default)]
    pub performed_by: Option<String>,
    /// When the next service is due.
    #[serde(default)]
    pub next_service_date: Option<NaiveDate>,
}

/// A listed equipment unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    /// Identifier.
    pub id: EquipmentId,
    /// Owning operator.
    pub owner: UserId,
    /// Category.
    pub category: CategoryId,
    /// Display name.
    pub name: String,
    /// Manufacturer.
    pub brand: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Year of manufacture.
    pub year_manufactured: Option<u16>,
    /// Serial number, unique among live listings.
    pub serial_number: Option<String>,
    /// Free-form description.
    pub description: String,
    /// Power source.
    pub fuel_type: FuelType,
    /// Engine power.
    pub horsepower: Option<f64>,
    /// Capacity note, e.g. "3-row planter".
    pub capacity_info: Option<String>,
    /// Price per day in minor units.
    pub daily_rate: Amount,
    /// Optional price per hour.
    pub hourly_rate: Option<Amount>,
    /// Whether the price covers a driver.
    pub includes_operator: bool,
    /// Whether the price covers fuel.
    pub includes_fuel: bool,
    /// County the unit currently sits in.
    pub county: String,
    /// Current position; required for discovery.
    pub location: Option<GeoPoint>,
    /// Listing status.
    pub status: EquipmentStatus,
    /// Whether staff inspected the listing.
    pub verified: bool,
    /// Availability calendar.
    pub blackouts: Vec<Blackout>,
    /// Service history, newest first.
    pub maintenance: Vec<MaintenanceRecord>,
    /// Date of the last service.
    pub last_serviced: Option<NaiveDate>,
    /// Date the next service is due.
    pub next_service_due: Option<NaiveDate>,
    /// Insurance expiry.
    pub insurance_expiry: Option<NaiveDate>,
    /// Listing time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion time.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Equipment {
    /// Whether the listing was removed.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether discovery may return this unit at all.
    #[must_use]
    pub const fn is_discoverable(&self) -> bool {
        !self.is_deleted() && self.location.is_some() && self.status.is_bookable()
    }

    /// First blackout overlapping `range`, if any.
    #[must_use]
    pub fn blackout_conflict(&self, range: &DateRange) -> Option<&Blackout> {
        self.blackouts.iter().find(|b| b.range.overlaps(range))
    }
}

/// Input for a new listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEquipment {
    /// Category.
    pub category: CategoryId,
    /// Display name.
    pub name: String,
    /// Manufacturer.
    #[serde(default)]
    pub brand: Option<String>,
    /// Model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Year of manufacture.
    #[serde(default)]
    pub year_manufactured: Option<u16>,
    /// Serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Power source.
    #[serde(default)]
    pub fuel_type: FuelType,
    /// Engine power.
    #[serde(default)]
    pub horsepower: Option<f64>,
    /// Capacity note.
    #[serde(default)]
    pub capacity_info: Option<String>,
    /// Price per day.
    pub daily_rate: Amount,
    /// Optional price per hour.
    #[serde(default)]
    pub hourly_rate: Option<Amount>,
    /// Whether the price covers a driver.
    #[serde(default = "default_true")]
    pub includes_operator: bool,
    /// Whether the price covers fuel.
    #[serde(default)]
    pub includes_fuel: bool,
    /// Current county.
    pub county: String,
    /// Current position.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Insurance expiry.
    #[serde(default)]
    pub insurance_expiry: Option<NaiveDate>,
}

const fn default_true() -> bool {
    true
}

/// Partial update of a listing. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquipmentPatch {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New daily rate.
    #[serde(default)]
    pub daily_rate: Option<Amount>,
    /// New hourly rate.
    #[serde(default)]
    pub hourly_rate: Option<Amount>,
    /// New driver flag.
    #[serde(default)]
    pub includes_operator: Option<bool>,
    /// New fuel flag.
    #[serde(default)]
    pub includes_fuel: Option<bool>,
    /// New county.
    #[serde(default)]
    pub county: Option<String>,
    /// New position.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// New capacity note.
    #[serde(default)]
    pub capacity_info: Option<String>,
    /// New insurance expiry.
    #[serde(default)]
    pub insurance_expiry: Option<NaiveDate>,
}

/// Listing filter for [`Catalog::list`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquipmentFilter {
    /// Only this owner's units.
    #[serde(default)]
    pub owner: Option<UserId>,
    /// Only this category.
    #[serde(default)]
    pub category: Option<CategoryId>,
    /// Only this status.
    #[serde(default)]
    pub status: Option<EquipmentStatus>,
    /// Include soft-deleted units.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Equipment categories and listings.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Catalog {
    categories: HashMap<CategoryId, EquipmentCategory>,
    equipment: HashMap<EquipmentId, Equipment>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a category. Names are unique, ignoring case.
    pub fn add_category(&mut self, name: &str, description: &str) -> MarketResult<EquipmentCategory> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::Validation("category name is required".to_string()));
        }
        if self
            .categories
            .values()
            .any(|c| c.name.eq_ignore_ascii_case(name))
        {
            return Err(MarketError::Conflict(format!("category {name} already exists")));
        }
        let category = EquipmentCategory {
            id: CategoryId::new(),
            name: name.to_string(),
            description: description.to_string(),
        };
        self.categories.insert(category.id, category.clone());
        Ok(category)
    }

    /// Gets a category by ID.
    pub fn category(&self, id: CategoryId) -> Option<&EquipmentCategory> {
        self.categories.get(&id)
    }

    /// All categories, sorted by name.
    pub fn categories(&self) -> Vec<&EquipmentCategory> {
        let mut all: Vec<_> = self.categories.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Creates a listing owned by `owner`.
    pub fn insert(&mut self, owner: UserId, input: NewEquipment) -> MarketResult<Equipment> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(MarketError::Validation("equipment name is required".to_string()));
        }
        if input.daily_rate == 0 {
            return Err(MarketError::Validation("daily rate must be positive".to_string()));
        }
        if input.county.trim().is_empty() {
            return Err(MarketError::Validation("county is required".to_string()));
        }
        if !self.categories.contains_key(&input.category) {
            return Err(MarketError::not_found("category", input.category));
        }
        if let Some(location) = &input.location {
            location.validate()?;
        }
        if let Some(hp) = input.horsepower {
            if !hp.is_finite() || hp <= 0.0 {
                return Err(MarketError::Validation("horsepower must be positive".to_string()));
            }
        }
        let serial_number = input
            .serial_number
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(serial) = &serial_number {
            if self.serial_in_use(serial) {
                return Err(MarketError::Conflict(format!(
                    "serial number {serial} is already listed"
                )));
            }
        }

        let now = Utc::now();
        let equipment = Equipment {
            id: EquipmentId::new(),
            owner,
            category: input.category,
            name: name.to_string(),
            brand: input.brand,
            model: input.model,
            year_manufactured: input.year_manufactured,
            serial_number,
            description: input.description,
            fuel_type: input.fuel_type,
            horsepower: input.horsepower,
            capacity_info: input.capacity_info,
            daily_rate: input.daily_rate,
            hourly_rate: input.hourly_rate,
            includes_operator: input.includes_operator,
            includes_fuel: input.includes_fuel,
            county: input.county.trim().to_string(),
            location: input.location,
            status: EquipmentStatus::Available,
            verified: false,
            blackouts: Vec::new(),
            maintenance: Vec::new(),
            last_serviced: None,
            next_service_due: None,
            insurance_expiry: input.insurance_expiry,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.equipment.insert(equipment.id, equipment.clone());
        Ok(equipment)
    }

    fn serial_in_use(&self, serial: &str) -> bool {
        self.equipment
            .values()
            .any(|e| !e.is_deleted() && e.serial_number.as_deref() == Some(serial))
    }

    /// Gets a listing, deleted or not.
    pub fn get(&self, id: EquipmentId) -> Option<&Equipment> {
        self.equipment.get(&id)
    }

    /// Gets a listing, failing when absent.
    pub fn require(&self, id: EquipmentId) -> MarketResult<&Equipment> {
        self.equipment
            .get(&id)
            .ok_or_else(|| MarketError::not_found("equipment", id))
    }

    pub(crate) fn require_mut(&mut self, id: EquipmentId) -> MarketResult<&mut Equipment> {
        self.equipment
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("equipment", id))
    }

    /// Gets a live listing for mutation by its owner.
    /// Gets a live listing owned by `actor`.
    pub fn require_owned(&self, id: EquipmentId, actor: UserId) -> MarketResult<&Equipment> {
        match self.get(id) {
            Some(e) if !e.is_deleted() => {
                if e.owner == actor {
                    Ok(e)
                } else {
                    Err(MarketError::Forbidden(format!(
                        "user {actor} does not own equipment {id}"
                    )))
                }
            }
            _ => Err(MarketError::not_found("equipment", id)),
        }
    }

    fn owned_mut(&mut self, id: EquipmentId, actor: UserId) -> MarketResult<&mut Equipment> {
        self.require_owned(id, actor)?;
        self.require_mut(id)
    }

    /// Applies a partial update.
    pub fn update(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        patch: EquipmentPatch,
    ) -> MarketResult<&Equipment> {
        if patch.daily_rate == Some(0) {
            return Err(MarketError::Validation("daily rate must be positive".to_string()));
        }
        if let Some(location) = &patch.location {
            location.validate()?;
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(MarketError::Validation("equipment name is required".to_string()));
            }
        }
        if let Some(county) = &patch.county {
            if county.trim().is_empty() {
                return Err(MarketError::Validation("county is required".to_string()));
            }
        }

        let equipment = self.owned_mut(id, actor)?;
        if let Some(name) = patch.name {
            equipment.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            equipment.description = description;
        }
        if let Some(rate) = patch.daily_rate {
            equipment.daily_rate = rate;
        }
        if let Some(rate) = patch.hourly_rate {
            equipment.hourly_rate = Some(rate);
        }
        if let Some(flag) = patch.includes_operator {
            equipment.includes_operator = flag;
        }
        if let Some(flag) = patch.includes_fuel {
            equipment.includes_fuel = flag;
        }
        if let Some(county) = patch.county {
            equipment.county = county.trim().to_string();
        }
        if let Some(location) = patch.location {
            equipment.location = Some(location);
        }
        if let Some(info) = patch.capacity_info {
            equipment.capacity_info = Some(info);
        }
        if let Some(expiry) = patch.insurance_expiry {
            equipment.insurance_expiry = Some(expiry);
        }
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Sets the listing status.
    pub fn set_status(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        status: EquipmentStatus,
    ) -> MarketResult<&Equipment> {
        let equipment = self.owned_mut(id, actor)?;
        equipment.status = status;
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Status change driven by the booking lifecycle; no owner check.
    pub(crate) fn set_status_internal(&mut self, id: EquipmentId, status: EquipmentStatus) {
        if let Some(equipment) = self.equipment.get_mut(&id) {
            equipment.status = status;
            equipment.updated_at = Utc::now();
        }
    }

    /// Adds a blackout. Ranges overlapping an existing blackout are rejected.
    pub fn add_blackout(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        blackout: Blackout,
    ) -> MarketResult<&Equipment> {
        blackout.range.validate()?;
        let equipment = self.owned_mut(id, actor)?;
        if let Some(existing) = equipment.blackout_conflict(&blackout.range) {
            return Err(MarketError::Conflict(format!(
                "blackout {} overlaps existing blackout {}",
                blackout.range, existing.range
            )));
        }
        equipment.blackouts.push(blackout);
        equipment.blackouts.sort_by_key(|b| b.range.start);
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Removes the blackout with exactly this range.
    pub fn remove_blackout(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        range: DateRange,
    ) -> MarketResult<&Equipment> {
        let equipment = self.owned_mut(id, actor)?;
        let before = equipment.blackouts.len();
        equipment.blackouts.retain(|b| b.range != range);
        if equipment.blackouts.len() == before {
            return Err(MarketError::not_found("blackout", range));
        }
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Marks a listing as inspected.
    pub fn verify(&mut self, id: EquipmentId) -> MarketResult<&Equipment> {
        let equipment = self.require_mut(id)?;
        if equipment.is_deleted() {
            return Err(MarketError::not_found("equipment", id));
        }
        equipment.verified = true;
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Appends a maintenance record and updates service dates.
    pub fn record_maintenance(
        &mut self,
        id: EquipmentId,
        actor: UserId,
        record: MaintenanceRecord,
    ) -> MarketResult<&Equipment> {
        if record.service_type.trim().is_empty() {
            return Err(MarketError::Validation("service type is required".to_string()));
        }
        if let Some(next) = record.next_service_date {
            if next < record.service_date {
                return Err(MarketError::Validation(
                    "next service date precedes service date".to_string(),
                ));
            }
        }
        let equipment = self.owned_mut(id, actor)?;
        if equipment
            .last_serviced
            .is_none_or(|last| record.service_date >= last)
        {
            equipment.last_serviced = Some(record.service_date);
            if record.next_service_date.is_some() {
                equipment.next_service_due = record.next_service_date;
            }
        }
        equipment.maintenance.push(record);
        equipment
            .maintenance
            .sort_by(|a, b| b.service_date.cmp(&a.service_date));
        equipment.updated_at = Utc::now();
        Ok(equipment)
    }

    /// Soft-deletes a listing.
    pub fn soft_delete(&mut self, id: EquipmentId, actor: UserId) -> MarketResult<&Equipment> {
        let equipment = self.owned_mut(id, actor)?;
        let now = Utc::now();
        equipment.deleted_at = Some(now);
        equipment.status = EquipmentStatus::Inactive;
        equipment.updated_at = now;
        Ok(equipment)
    }

    /// Listings matching the filter, newest first.
    pub fn list(&self, filter: &EquipmentFilter) -> Vec<&Equipment> {
        let mut items: Vec<_> = self
            .equipment
            .values()
            .filter(|e| filter.include_deleted || !e.is_deleted())
            .filter(|e| filter.owner.is_none_or(|o| e.owner == o))
            .filter(|e| filter.category.is_none_or(|c| e.category == c))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Every listing, for discovery scans.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Equipment> {
        self.equipment.values()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tractor_input(category: CategoryId) -> NewEquipment {
        NewEquipment {
            category,
            name: "Massey Ferguson 375".to_string(),
            brand: Some("Massey Ferguson".to_string()),
            model: Some("375".to_string()),
            year_manufactured: Some(2014),
            serial_number: None,
            description: "75hp 2WD tractor with disc plough".to_string(),
            fuel_type: FuelType::Diesel,
            horsepower: Some(75.0),
            capacity_info: None,
            daily_rate: 800_000,
            hourly_rate: None,
            includes_operator: true,
            includes_fuel: false,
            county: "Nakuru".to_string(),
            location: Some(GeoPoint { lat: -0.3031, lon: 36.08 }),
            insurance_expiry: None,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    fn setup() -> (Catalog, CategoryId, UserId) {
        let mut catalog = Catalog::new();
        let cat = catalog.add_category("Tractor", "Four-wheel tractors").unwrap();
        (catalog, cat.id, UserId::new())
    }

    #[test]
    fn category_names_are_unique() {
        let (mut catalog, _, _) = setup();
        assert!(matches!(
            catalog.add_category("tractor", ""),
            Err(MarketError::Conflict(_))
        ));
        catalog.add_category("Planter", "").unwrap();
        let names: Vec<_> = catalog.categories().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["Planter", "Tractor"]);
    }

    #[test]
    fn insert_validates_input() {
        let (mut catalog, cat, owner) = setup();

        let mut zero_rate = tractor_input(cat);
        zero_rate.daily_rate = 0;
        assert!(catalog.insert(owner, zero_rate).is_err());

        let mut bad_loc = tractor_input(cat);
        bad_loc.location = Some(GeoPoint { lat: 0.0, lon: 200.0 });
        assert!(catalog.insert(owner, bad_loc).is_err());

        let unknown_cat = tractor_input(CategoryId::new());
        assert!(matches!(
            catalog.insert(owner, unknown_cat),
            Err(MarketError::NotFound { .. })
        ));

        let ok = catalog.insert(owner, tractor_input(cat)).unwrap();
        assert_eq!(ok.status, EquipmentStatus::Available);
        assert!(ok.is_discoverable());
    }

    #[test]
    fn serial_numbers_unique_among_live_listings() {
        let (mut catalog, cat, owner) = setup();
        let mut input = tractor_input(cat);
        input.serial_number = Some("MF-001".to_string());
        let first = catalog.insert(owner, input.clone()).unwrap();

        assert!(matches!(
            catalog.insert(owner, input.clone()),
            Err(MarketError::Conflict(_))
        ));

        catalog.soft_delete(first.id, owner).unwrap();
        assert!(catalog.insert(owner, input).is_ok());
    }

    #[test]
    fn only_owner_may_update() {
        let (mut catalog, cat, owner) = setup();
        let eq = catalog.insert(owner, tractor_input(cat)).unwrap();

        let patch = EquipmentPatch {
            daily_rate: Some(900_000),
            ..EquipmentPatch::default()
        };
        assert!(matches!(
            catalog.update(eq.id, UserId::new(), patch.clone()),
            Err(MarketError::Forbidden(_))
        ));
        let updated = catalog.update(eq.id, owner, patch).unwrap();
        assert_eq!(updated.daily_rate, 900_000);
    }

    #[test]
    fn deleted_equipment_is_immutable_and_hidden() {
        let (mut catalog, cat, owner) = setup();
        let eq = catalog.insert(owner, tractor_input(cat)).unwrap();
        catalog.soft_delete(eq.id, owner).unwrap();

        assert!(catalog.update(eq.id, owner, EquipmentPatch::default()).is_err());
        assert!(catalog.list(&EquipmentFilter::default()).is_empty());
        let all = catalog.list(&EquipmentFilter {
            include_deleted: true,
            ..EquipmentFilter::default()
        });
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_discoverable());
    }

    #[test]
    fn undiscoverable_without_location() {
        let (mut catalog, cat, owner) = setup();
        let mut input = tractor_input(cat);
        input.location = None;
        let eq = catalog.insert(owner, input).unwrap();
        assert!(!eq.is_discoverable());
    }

    #[test]
    fn maintenance_status_hides_from_discovery() {
        let (mut catalog, cat, owner) = setup();
        let eq = catalog.insert(owner, tractor_input(cat)).unwrap();
        let eq = catalog
            .set_status(eq.id, owner, EquipmentStatus::Maintenance)
            .unwrap();
        assert!(!eq.is_discoverable());
    }

    #[test]
    fn blackouts_cannot_overlap_each_other() {
        let (mut catalog, cat, owner) = setup();
        let eq = catalog.insert(owner, tractor_input(cat)).unwrap();
        let first = Blackout {
            range: DateRange::new(day(10), day(12)).unwrap(),
            reason: Some("family event".to_string()),
        };
        catalog.add_blackout(eq.id, owner, first).unwrap();

        let overlapping = Blackout {
            range: DateRange::new(day(12), day(14)).unwrap(),
            reason: None,
        };
        assert!(catalog.add_blackout(eq.id, owner, overlapping).is_err());

        let single_day = DateRange::new(day(11), day(11)).unwrap();
        assert!(catalog.get(eq.id).unwrap().blackout_conflict(&single_day).is_some());

        catalog
            .remove_blackout(eq.id, owner, DateRange::new(day(10), day(12)).unwrap())
            .unwrap();
        assert!(catalog.get(eq.id).unwrap().blackout_conflict(&single_day).is_none());
        assert!(catalog
            .remove_blackout(eq.id, owner, DateRange::new(day(10), day(12)).unwrap())
            .is_err());
    }

    #[test]
    fn maintenance_updates_service_dates() {
        let (mut catalog, cat, owner) = setup();
        let eq = catalog.insert(owner, tractor_input(cat)).unwrap();
        let record = MaintenanceRecord {
            service_date: day(1),
            service_type: "oil change".to_string(),
            description: String::new(),
            cost: 350_000,
            performed_by: Some("Nakuru Motors".to_string()),
            next_service_date: Some(day(28)),
        };
        let eq = catalog.record_maintenance(eq.id, owner, record).unwrap();
        assert_eq!(eq.last_serviced, Some(day(1)));
        assert_eq!(eq.next_service_due, Some(day(28)));
        assert_eq!(eq.maintenance.len(), 1);
    }

    #[test]
    fn list_filters_by_owner() {
        let (mut catalog, cat, owner) = setup();
        let other = UserId::new();
        catalog.insert(owner, tractor_input(cat)).unwrap();
        let mut input = tractor_input(cat);
        input.name = "John Deere 5050".to_string();
        catalog.insert(other, input).unwrap();

        let mine = catalog.list(&EquipmentFilter {
            owner: Some(owner),
            ..EquipmentFilter::default()
        });
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].owner, owner);
    }
}
