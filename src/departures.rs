//! Stop board building: turns SIRI visits into labelled trips, groups them by
//! destination and works out the service state when nothing is running.

use crate::config::StopDefinition;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A departure at or below this many seconds away is shown as imminent.
pub const IMMINENT_THRESHOLD_SECS: i64 = 120;
/// How long a departure stays on the board once its time has passed.
pub const DEPARTED_GRACE_SECS: i64 = 30;

/// One vehicle call at the monitored stop, as read from the stop-monitoring feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransitVisit {
    pub line_ref: Option<String>,
    pub direction_ref: Option<String>,
    pub direction_name: Option<String>,
    pub destination: Option<String>,
    pub aimed_departure: Option<DateTime<Utc>>,
    pub expected_departure: Option<DateTime<Utc>>,
    pub aimed_arrival: Option<DateTime<Utc>>,
    pub expected_arrival: Option<DateTime<Utc>>,
    pub departure_status: Option<String>,
    pub vehicle_at_stop: bool,
}

impl TransitVisit {
    /// Best known departure instant: expected, then aimed, then arrival times.
    pub fn departure_time(&self) -> Option<DateTime<Utc>> {
        self.expected_departure
            .or(self.aimed_departure)
            .or(self.expected_arrival)
            .or(self.aimed_arrival)
    }

    fn is_cancelled(&self) -> bool {
        self.departure_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripStatus {
    Cancelled,
    AtStop,
    Departed,
    Imminent,
    Delayed { minutes: i64 },
    Early { minutes: i64 },
    OnTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedTrip {
    pub line_ref: Option<String>,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub aimed: Option<DateTime<Utc>>,
    pub minutes_until: i64,
    pub status: TripStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationGroup {
    pub destination: String,
    pub trips: Vec<FormattedTrip>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    NotStarted { first: DateTime<Utc> },
    Ended { next: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopBoard {
    pub key: String,
    pub name: String,
    pub icon: String,
    pub vehicle_label: String,
    pub state: ServiceState,
    pub groups: Vec<DestinationGroup>,
    pub first_departure: Option<DateTime<Utc>>,
    pub last_departure: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// Labels one visit relative to `now`. `None` when the visit carries no time at all.
pub fn format_trip(visit: &TransitVisit, now: DateTime<Utc>) -> Option<FormattedTrip> {
    let departure = visit.departure_time()?;
    let seconds_until = (departure - now).num_seconds();
    let aimed = visit.aimed_departure.or(visit.aimed_arrival);
    let expected = visit.expected_departure.or(visit.expected_arrival);

    let status = if visit.is_cancelled() {
        if seconds_until < -DEPARTED_GRACE_SECS {
            TripStatus::Departed
        } else {
            TripStatus::Cancelled
        }
    } else if visit.vehicle_at_stop {
        TripStatus::AtStop
    } else if seconds_until < -DEPARTED_GRACE_SECS {
        TripStatus::Departed
    } else if seconds_until <= IMMINENT_THRESHOLD_SECS {
        TripStatus::Imminent
    } else {
        match (aimed, expected) {
            (Some(aimed), Some(expected)) => {
                // Whole minutes, truncated: 59 s late is still on time.
                let delay = (expected - aimed).num_minutes();
                if delay >= 1 {
                    TripStatus::Delayed { minutes: delay }
                } else if delay <= -1 {
                    TripStatus::Early { minutes: -delay }
                } else {
                    TripStatus::OnTime
                }
            }
            _ => TripStatus::OnTime,
        }
    };

    Some(FormattedTrip {
        line_ref: visit.line_ref.clone(),
        destination: visit
            .destination
            .clone()
            .unwrap_or_else(|| "Terminus".to_string()),
        departure,
        aimed,
        minutes_until: seconds_until.max(0) / 60,
        status,
    })
}

/// Groups trips by destination. Each group is sorted by departure, and the
/// groups themselves are ordered by their earliest departure.
pub fn group_by_destination(trips: Vec<FormattedTrip>) -> Vec<DestinationGroup> {
    let mut by_destination: HashMap<String, Vec<FormattedTrip>> = HashMap::new();
    for trip in trips {
        by_destination
            .entry(trip.destination.clone())
            .or_default()
            .push(trip);
    }

    let mut groups: Vec<DestinationGroup> = by_destination
        .into_iter()
        .map(|(destination, mut trips)| {
            trips.sort_by_key(|t| t.departure);
            DestinationGroup { destination, trips }
        })
        .collect();

    groups.sort_by(|a, b| {
        a.trips[0]
            .departure
            .cmp(&b.trips[0].departure)
            .then_with(|| a.destination.cmp(&b.destination))
    });
    groups
}

/// Earliest and latest departure among trips that will actually run.
pub fn first_and_last(trips: &[FormattedTrip]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let running = trips.iter().filter(|t| t.status != TripStatus::Cancelled);
    let first = running.clone().map(|t| t.departure).min()?;
    let last = running.map(|t| t.departure).max()?;
    Some((first, last))
}

/// True when no visit is still worth showing, i.e. the board needs the
/// next scheduled departure to explain why it is empty.
pub fn has_no_upcoming(visits: &[TransitVisit], now: DateTime<Utc>) -> bool {
    visits
        .iter()
        .filter_map(|v| format_trip(v, now))
        .all(|t| t.status == TripStatus::Departed)
}

pub fn build_stop_board(
    stop: &StopDefinition,
    visits: &[TransitVisit],
    next_scheduled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    per_group: usize,
) -> StopBoard {
    let trips: Vec<FormattedTrip> = visits
        .iter()
        .filter_map(|v| format_trip(v, now))
        .filter(|t| t.status != TripStatus::Departed)
        .collect();

    let extremes = first_and_last(&trips);

    let state = if trips.is_empty() {
        match next_scheduled {
            Some(first) if first > now => ServiceState::NotStarted { first },
            next => ServiceState::Ended { next },
        }
    } else {
        ServiceState::Running
    };

    let mut groups = group_by_destination(trips);
    for group in &mut groups {
        group.trips.truncate(per_group.max(1));
    }

    StopBoard {
        key: stop.key.to_string(),
        name: stop.name.to_string(),
        icon: stop.icon.to_string(),
        vehicle_label: stop.vehicle_label.to_string(),
        state,
        groups,
        first_departure: extremes.map(|(first, _)| first),
        last_departure: extremes.map(|(_, last)| last),
        generated_at: now,
    }
}
