// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Staff directory management: list, create, update, toggle, delete.
//!
//! New staff get the hashed CIN as their default password. Every mutation
//! emits a `staff.updated` event so operator UIs stay current.

use std::sync::Arc;

use serde::Deserialize;

use crate::auth::hash_password;
use crate::error::{NodeError, Result};
use crate::events::{EventBus, NodeEvent, StaffAction};
use crate::ids::{is_valid_cin, new_id};
use crate::model::{Staff, StaffPublic, StaffRole};
use crate::store::Store;

pub struct StaffDirectory {
    store: Arc<Store>,
    bus: EventBus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStaffRequest {
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub role: StaffRole,
    pub phone_number: String,
    /// Cleartext; hashed before storage. Defaults to the CIN.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStaffRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub role: Option<StaffRole>,
}

impl StaffDirectory {
    pub fn new(store: Arc<Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// All staff, stable order by last name then CIN.
    pub async fn list(&self) -> Vec<StaffPublic> {
        self.store
            .read(|t| {
                let mut staff: Vec<StaffPublic> =
                    t.staff.values().map(StaffPublic::from).collect();
                staff.sort_by(|a, b| {
                    a.last_name.cmp(&b.last_name).then(a.cin.cmp(&b.cin))
                });
                staff
            })
            .await
    }

    pub async fn create(&self, req: CreateStaffRequest) -> Result<StaffPublic> {
        if !is_valid_cin(&req.cin) {
            return Err(NodeError::InvalidArgument("cin must be exactly 8 digits".into()));
        }
        if req.first_name.is_empty() || req.last_name.is_empty() {
            return Err(NodeError::InvalidArgument("staff name is required".into()));
        }

        let password = hash_password(req.password.as_deref().unwrap_or(&req.cin));
        let created = self
            .store
            .transaction(move |t| {
                if t.staff_by_cin(&req.cin).is_some() {
                    return Err(NodeError::Conflict(format!("staff cin {} exists", req.cin)));
                }
                let staff = Staff {
                    id: new_id(),
                    cin: req.cin,
                    first_name: req.first_name,
                    last_name: req.last_name,
                    role: req.role,
                    phone_number: req.phone_number,
                    password,
                    is_active: true,
                    last_login: None,
                };
                t.staff.insert(staff.id.clone(), staff.clone());
                Ok(staff)
            })
            .await?;

        let public = StaffPublic::from(&created);
        self.emit(StaffAction::Created, public.clone());
        Ok(public)
    }

    pub async fn update(&self, staff_id: &str, req: UpdateStaffRequest) -> Result<StaffPublic> {
        let staff_id = staff_id.to_owned();
        let updated = self
            .store
            .transaction(move |t| {
                let staff = t
                    .staff
                    .get_mut(&staff_id)
                    .ok_or_else(|| NodeError::NotFound(format!("staff {staff_id}")))?;
                if let Some(first_name) = req.first_name {
                    staff.first_name = first_name;
                }
                if let Some(last_name) = req.last_name {
                    staff.last_name = last_name;
                }
                if let Some(phone_number) = req.phone_number {
                    staff.phone_number = phone_number;
                }
                if let Some(role) = req.role {
                    staff.role = role;
                }
                Ok(staff.clone())
            })
            .await?;

        let public = StaffPublic::from(&updated);
        self.emit(StaffAction::Updated, public.clone());
        Ok(public)
    }

    /// Flip active status. Deactivation also kills the staff's sessions.
    pub async fn toggle_status(&self, staff_id: &str) -> Result<StaffPublic> {
        let staff_id = staff_id.to_owned();
        let toggled = self
            .store
            .transaction(move |t| {
                let staff = t
                    .staff
                    .get_mut(&staff_id)
                    .ok_or_else(|| NodeError::NotFound(format!("staff {staff_id}")))?;
                staff.is_active = !staff.is_active;
                let staff = staff.clone();
                if !staff.is_active {
                    t.deactivate_sessions_for(&staff_id);
                }
                Ok(staff)
            })
            .await?;

        let public = StaffPublic::from(&toggled);
        self.emit(StaffAction::StatusToggled, public.clone());
        Ok(public)
    }

    pub async fn delete(&self, staff_id: &str) -> Result<()> {
        let staff_id = staff_id.to_owned();
        let removed = self
            .store
            .transaction(move |t| {
                let staff = t
                    .staff
                    .remove(&staff_id)
                    .ok_or_else(|| NodeError::NotFound(format!("staff {staff_id}")))?;
                t.sessions.retain(|_, s| s.staff_id != staff_id);
                Ok(staff)
            })
            .await?;

        self.emit(StaffAction::Deleted, StaffPublic::from(&removed));
        Ok(())
    }

    fn emit(&self, action: StaffAction, staff: StaffPublic) {
        self.bus.emit(NodeEvent::StaffUpdated { action, staff });
    }
}

#[cfg(test)]
#[path = "staff_tests.rs"]
mod tests;
