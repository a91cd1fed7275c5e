//! Price history abstractions and core types

use crate::core::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily adjusted closes of one ticker, ascending by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Builds a series, dropping non-finite or non-positive closes and
    /// keeping the last observation for a repeated date.
    pub fn new(ticker: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.retain(|p| p.close.is_finite() && p.close > 0.0);
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }
        PriceSeries {
            ticker: ticker.into(),
            points: deduped,
        }
    }

    /// Restricts the series to `[start, end]`.
    pub fn within(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.points.retain(|p| p.date >= start && p.date <= end);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.points.last().map(|p| p.close)
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|index| self.points[index].close)
    }
}

/// Source of daily price history, selected by configuration.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries>;
}
