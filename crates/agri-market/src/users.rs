//! Platform users and their role-specific profiles.

use std::collections::HashMap;

use agri_proto::{Amount, GeoPoint, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SERVICE_RADIUS_KM;
use crate::error::{MarketError, MarketResult};
use crate::payout::PayoutMethod;

/// What a user does on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Smallholder renting equipment.
    Farmer,
    /// Equipment owner or operator.
    Operator,
    /// Platform staff.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Farmer => write!(f, "farmer"),
            Self::Operator => write!(f, "operator"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Farm details for a farmer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    /// Optional farm name.
    #[serde(default)]
    pub farm_name: Option<String>,
    /// Land under cultivation.
    #[serde(default)]
    pub total_land_acres: f64,
    /// Main crop grown.
    #[serde(default)]
    pub primary_crop: Option<String>,
    /// Other crops grown.
    #[serde(default)]
    pub secondary_crops: Vec<String>,
    /// County the farm is in.
    pub county: String,
    /// Village or locality.
    #[serde(default)]
    pub village: Option<String>,
    /// Farm GPS position.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Whether notifications can go beyond SMS.
    #[serde(default = "default_true")]
    pub has_smartphone: bool,
    /// Language for notifications.
    #[serde(default = "default_language")]
    pub preferred_language: String,
}

fn default_language() -> String {
    "English".to_string()
}

/// Editable operator details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDetails {
    /// Trading name.
    #[serde(default)]
    pub business_name: Option<String>,
    /// Years operating machinery.
    #[serde(default)]
    pub years_experience: u32,
    /// Operator licence number.
    #[serde(default)]
    pub license_number: Option<String>,
    /// How far the operator will travel.
    #[serde(default = "default_service_radius")]
    pub service_radius_km: u32,
    /// Home county.
    pub county: String,
    /// Mobile-money number used for payouts.
    #[serde(default)]
    pub mobile_money_number: Option<String>,
    /// Bank account used for payouts when no mobile-money number is set.
    #[serde(default)]
    pub bank_account: Option<String>,
    /// Whether the operator is taking new work.
    #[serde(default = "default_true")]
    pub is_available: bool,
}

impl Default for OperatorDetails {
    fn default() -> Self {
        Self {
            business_name: None,
            years_experience: 0,
            license_number: None,
            service_radius_km: DEFAULT_SERVICE_RADIUS_KM,
            county: String::new(),
            mobile_money_number: None,
            bank_account: None,
            is_available: true,
        }
    }
}

const fn default_service_radius() -> u32 {
    DEFAULT_SERVICE_RADIUS_KM
}

const fn default_true() -> bool {
    true
}

/// A county an operator serves, with its extra transport charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceArea {
    /// County name.
    pub county: String,
    /// Transport fee added to bookings in this county.
    pub additional_charge: Amount,
}

/// Operator profile with reputation counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfile {
    /// Editable details.
    #[serde(flatten)]
    pub details: OperatorDetails,
    /// Counties served.
    pub service_areas: Vec<ServiceArea>,
    /// Sum of all ratings received from farmers.
    pub rating_sum: u64,
    /// Number of ratings received from farmers.
    pub ratings_count: u32,
    /// Bookings completed.
    pub total_jobs_completed: u32,
}

impl OperatorProfile {
    fn new(details: OperatorDetails) -> Self {
        Self {
            details,
            service_areas: Vec::new(),
            rating_sum: 0,
            ratings_count: 0,
            total_jobs_completed: 0,
        }
    }

    /// Average rating in hundredths (450 is 4.50), rounded half up.
    #[must_use]
    pub fn average_rating(&self) -> u16 {
        if self.ratings_count == 0 {
            return 0;
        }
        let count = u64::from(self.ratings_count);
        let avg = (self.rating_sum * 100 + count / 2) / count;
        u16::try_from(avg).unwrap_or(u16::MAX)
    }

    /// Transport charge for the given county, zero when not a listed area.
    #[must_use]
    pub fn transport_fee(&self, county: &str) -> Amount {
        self.service_areas
            .iter()
            .find(|a| a.county.eq_ignore_ascii_case(county))
            .map_or(0, |a| a.additional_charge)
    }
}

/// A registered platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    pub id: UserId,
    /// Platform role.
    pub role: Role,
    /// Display name.
    pub full_name: String,
    /// Contact number.
    pub phone_number: String,
    /// National ID number.
    pub national_id: Option<String>,
    /// Whether staff checked the national ID.
    pub id_verified: bool,
    /// Present for farmers once set.
    pub farmer_profile: Option<FarmerProfile>,
    /// Present for operators once set.
    pub operator_profile: Option<OperatorProfile>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Registration input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    /// Platform role.
    pub role: Role,
    /// Display name.
    pub full_name: String,
    /// Contact number.
    pub phone_number: String,
    /// National ID number.
    #[serde(default)]
    pub national_id: Option<String>,
}

fn validate_phone(phone: &str) -> MarketResult<()> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(MarketError::Validation(format!("invalid phone number: {phone}")));
    }
    Ok(())
}

/// All registered users.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UserDirectory {
    users: HashMap<UserId, User>,
}

impl UserDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Registers a new user.
    pub fn register(&mut self, input: NewUser) -> MarketResult<User> {
        let full_name = input.full_name.trim();
        if full_name.is_empty() {
            return Err(MarketError::Validation("full name is required".to_string()));
        }
        validate_phone(&input.phone_number)?;
        if self
            .users
            .values()
            .any(|u| u.phone_number == input.phone_number)
        {
            return Err(MarketError::Conflict(format!(
                "phone number {} is already registered",
                input.phone_number
            )));
        }

        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            role: input.role,
            full_name: full_name.to_string(),
            phone_number: input.phone_number,
            national_id: input.national_id,
            id_verified: false,
            farmer_profile: None,
            operator_profile: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Gets a user by ID.
    pub fn get(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Gets a user, failing when absent.
    pub fn require(&self, id: UserId) -> MarketResult<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| MarketError::not_found("user", id))
    }

    fn require_mut(&mut self, id: UserId) -> MarketResult<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("user", id))
    }

    /// Gets a user and checks their role.
    pub fn require_role(&self, id: UserId, role: Role) -> MarketResult<&User> {
        let user = self.require(id)?;
        if user.role != role {
            return Err(MarketError::Forbidden(format!(
                "user {id} is a {}, not a {role}",
                user.role
            )));
        }
        Ok(user)
    }

    /// Sets or replaces a farmer's profile.
    pub fn set_farmer_profile(&mut self, id: UserId, profile: FarmerProfile) -> MarketResult<&User> {
        self.require_role(id, Role::Farmer)?;
        if let Some(location) = &profile.location {
            location.validate()?;
        }
        if profile.county.trim().is_empty() {
            return Err(MarketError::Validation("county is required".to_string()));
        }
        if !profile.total_land_acres.is_finite() || profile.total_land_acres < 0.0 {
            return Err(MarketError::Validation("land size must be non-negative".to_string()));
        }
        let mut profile = profile;
        profile.secondary_crops.retain(|c| !c.trim().is_empty());
        let user = self.require_mut(id)?;
        user.farmer_profile = Some(profile);
        user.updated_at = Utc::now();
        Ok(user)
    }

    /// Sets an operator's editable details, keeping reputation counters.
    pub fn set_operator_profile(
        &mut self,
        id: UserId,
        details: OperatorDetails,
    ) -> MarketResult<&User> {
        self.require_role(id, Role::Operator)?;
        if details.county.trim().is_empty() {
            return Err(MarketError::Validation("county is required".to_string()));
        }
        if details.service_radius_km == 0 {
            return Err(MarketError::Validation(
                "service radius must be positive".to_string(),
            ));
        }
        let user = self.require_mut(id)?;
        match &mut user.operator_profile {
            Some(profile) => profile.details = details,
            None => user.operator_profile = Some(OperatorProfile::new(details)),
        }
        user.updated_at = Utc::now();
        Ok(user)
    }

    /// Adds a county to an operator's service areas.
    pub fn add_service_area(&mut self, id: UserId, area: ServiceArea) -> MarketResult<&User> {
        self.require_role(id, Role::Operator)?;
        if area.county.trim().is_empty() {
            return Err(MarketError::Validation("county is required".to_string()));
        }
        let user = self.require_mut(id)?;
        let profile = user.operator_profile.as_mut().ok_or_else(|| {
            MarketError::Validation(format!("operator {id} has no profile yet"))
        })?;
        if profile
            .service_areas
            .iter()
            .any(|a| a.county.eq_ignore_ascii_case(&area.county))
        {
            return Err(MarketError::Conflict(format!(
                "operator {id} already serves {}",
                area.county
            )));
        }
        profile.service_areas.push(area);
        user.updated_at = Utc::now();
        Ok(user)
    }

    /// Marks a user's national ID as verified.
    pub fn verify_identity(&mut self, admin: UserId, id: UserId) -> MarketResult<&User> {
        self.require_role(admin, Role::Admin)?;
        let user = self.require_mut(id)?;
        user.id_verified = true;
        user.updated_at = Utc::now();
        Ok(user)
    }

    /// Records a farmer's rating of an operator.
    pub(crate) fn record_operator_rating(&mut self, id: UserId, rating: u8) {
        if let Some(profile) = self
            .users
            .get_mut(&id)
            .and_then(|u| u.operator_profile.as_mut())
        {
            profile.rating_sum += u64::from(rating);
            profile.ratings_count += 1;
        }
    }

    /// Counts a completed job for an operator.
    pub(crate) fn record_completed_job(&mut self, id: UserId) {
        if let Some(profile) = self
            .users
            .get_mut(&id)
            .and_then(|u| u.operator_profile.as_mut())
        {
            profile.total_jobs_completed += 1;
        }
    }

    /// Service radius of an operator, or the default when no profile exists.
    #[must_use]
    pub fn service_radius_km(&self, id: UserId) -> u32 {
        self.get(id)
            .and_then(|u| u.operator_profile.as_ref())
            .map_or(DEFAULT_SERVICE_RADIUS_KM, |p| p.details.service_radius_km)
    }

    /// Whether an operator is taking work. Operators without a profile are.
    #[must_use]
    pub fn operator_available(&self, id: UserId) -> bool {
        self.get(id)
            .and_then(|u| u.operator_profile.as_ref())
            .is_none_or(|p| p.details.is_available)
    }

    /// Where an operator's payouts go: the profile's mobile-money number,
    /// then its bank account, then the registered phone.
    #[must_use]
    pub fn payout_method(&self, id: UserId) -> PayoutMethod {
        let details = self
            .get(id)
            .and_then(|u| u.operator_profile.as_ref())
            .map(|p| &p.details);
        match details {
            Some(d) if d.mobile_money_number.is_some() => PayoutMethod::MobileMoney,
            Some(d) if d.bank_account.is_some() => PayoutMethod::BankTransfer,
            _ => PayoutMethod::MobileMoney,
        }
    }

    /// Transport fee an operator charges for a county.
    #[must_use]
    pub fn transport_fee(&self, id: UserId, county: &str) -> Amount {
        self.get(id)
            .and_then(|u| u.operator_profile.as_ref())
            .map_or(0, |p| p.transport_fee(county))
    }
}
