// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Revenue reporting: per-staff daily aggregates and transaction listings
//! over cash bookings and day passes.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::store::Store;

pub struct Reports {
    store: Arc<Store>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub staff_id: String,
    pub day_start: u64,
    pub day_end: u64,
    pub bookings: u32,
    pub seats_sold: u32,
    pub booking_revenue: f64,
    pub day_passes: u32,
    pub day_pass_revenue: f64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Booking,
    DayPass,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub kind: TransactionKind,
    pub id: String,
    pub amount: f64,
    pub at: u64,
    /// Ticket code for bookings, license plate for day passes.
    pub reference: String,
}

/// Local-time day bounds `[start, end)` containing `at_ms`.
pub fn local_day_bounds(at_ms: u64) -> (u64, u64) {
    let dt = Local
        .timestamp_millis_opt(at_ms as i64)
        .single()
        .unwrap_or_else(Local::now);
    let start = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .map(|d| d.timestamp_millis() as u64)
        .unwrap_or(at_ms);
    (start, start + 24 * 3600 * 1000)
}

impl Reports {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Aggregate one staff member's sales for the local day containing
    /// `at_ms`.
    pub async fn daily_report(&self, staff_id: &str, at_ms: u64) -> DailyReport {
        let (day_start, day_end) = local_day_bounds(at_ms);
        let staff_id = staff_id.to_owned();
        self.store
            .read(move |t| {
                let mut report = DailyReport {
                    staff_id: staff_id.clone(),
                    day_start,
                    day_end,
                    bookings: 0,
                    seats_sold: 0,
                    booking_revenue: 0.0,
                    day_passes: 0,
                    day_pass_revenue: 0.0,
                    total_revenue: 0.0,
                };
                for b in t.bookings.values() {
                    if b.created_by == staff_id
                        && b.created_at >= day_start
                        && b.created_at < day_end
                    {
                        report.bookings += 1;
                        report.seats_sold += b.seats_booked;
                        report.booking_revenue += b.total_amount;
                    }
                }
                for p in t.day_passes.values() {
                    if p.created_by == staff_id
                        && p.purchase_date >= day_start
                        && p.purchase_date < day_end
                    {
                        report.day_passes += 1;
                        report.day_pass_revenue += p.price;
                    }
                }
                report.total_revenue = report.booking_revenue + report.day_pass_revenue;
                report
            })
            .await
    }

    /// One staff member's transactions in `[from_ms, to_ms)`, newest first.
    pub async fn transactions(
        &self,
        staff_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<TransactionRecord> {
        let staff_id = staff_id.to_owned();
        self.store
            .read(move |t| {
                let mut records = Vec::new();
                for b in t.bookings.values() {
                    if b.created_by == staff_id && b.created_at >= from_ms && b.created_at < to_ms
                    {
                        records.push(TransactionRecord {
                            kind: TransactionKind::Booking,
                            id: b.id.clone(),
                            amount: b.total_amount,
                            at: b.created_at,
                            reference: b.verification_code.clone(),
                        });
                    }
                }
                for p in t.day_passes.values() {
                    if p.created_by == staff_id
                        && p.purchase_date >= from_ms
                        && p.purchase_date < to_ms
                    {
                        records.push(TransactionRecord {
                            kind: TransactionKind::DayPass,
                            id: p.id.clone(),
                            amount: p.price,
                            at: p.purchase_date,
                            reference: p.license_plate.clone(),
                        });
                    }
                }
                records.sort_by(|a, b| b.at.cmp(&a.at));
                records
            })
            .await
    }
}

#[cfg(test)]
#[path = "reports_tests.rs"]
mod tests;
