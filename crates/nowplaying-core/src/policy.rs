//! When does an observation become a recorded play?
//!
//! A station is recorded the first time anything is seen on it.  After that
//! a new play needs BOTH a different artist/song pair AND more than
//! `min_interval` since the previous recorded play.  The interval gate keeps
//! stations that flicker between two titles (ad breaks, metadata glitches)
//! from flooding the history, and an unchanged pair is never recorded twice
//! in a row no matter how long it has been playing.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::store::LastPlayed;
use crate::title::Observation;

pub fn should_record(
    last: Option<&LastPlayed>,
    observed: &Observation,
    now: DateTime<Utc>,
    min_interval: Duration,
) -> bool {
    let Some(last) = last else {
        return true;
    };

    if last.artist == observed.artist && last.song == observed.song {
        return false;
    }

    let Ok(min_interval) = chrono::Duration::from_std(min_interval) else {
        return false;
    };
    now.signed_duration_since(last.played_at) > min_interval
}
