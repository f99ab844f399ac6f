use std::fmt::{self, Write};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Day-first layout with explicit zone, e.g. `01/03/2024, 12:00:00 UTC`.
const READOUT_LAYOUT: &str = "%d/%m/%Y, %H:%M:%S %Z";

/// Paired UTC and local renderings of one forecast time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeReadout {
    pub utc: String,
    pub local: String,
}

impl fmt::Display for TimeReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.utc, self.local)
    }
}

pub fn format_readout(instant: DateTime<Utc>, local_zone: Tz) -> TimeReadout {
    let mut utc = String::with_capacity(24);
    let mut local = String::with_capacity(24);
    write_zoned(&mut utc, &instant);
    write_zoned(&mut local, &instant.with_timezone(&local_zone));
    TimeReadout { utc, local }
}

pub fn write_zoned<Z>(buf: &mut String, instant: &DateTime<Z>)
where
    Z: TimeZone,
    Z::Offset: fmt::Display,
{
    buf.clear();
    let _ = write!(buf, "{}", instant.format(READOUT_LAYOUT));
}
