//! Catalog of seismic events, stations and phase picks.
//!
//! The three tables are kept in ordered maps so that every iteration over
//! the catalog is deterministic regardless of insertion order. Phases are
//! keyed by the unique `(event, station, phase type)` triple. Events are
//! never mutated in place: a relocated event is a new record replacing the
//! old one.

pub mod reader;

use std::collections::BTreeMap;
use std::fmt;

use hifitime::Epoch;

use crate::constants::{Degree, EventId, Kilometer, Seconds, StationId};
use crate::seisdd_errors::SeisddError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseType {
    P,
    S,
}

impl PhaseType {
    pub fn as_char(&self) -> char {
        match self {
            PhaseType::P => 'P',
            PhaseType::S => 'S',
        }
    }

    pub fn from_char(c: char) -> Result<Self, SeisddError> {
        match c.to_ascii_uppercase() {
            'P' => Ok(PhaseType::P),
            'S' => Ok(PhaseType::S),
            other => Err(SeisddError::InvalidCatalog(format!(
                "unknown phase type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Relocation outcome attached to events of a relocated catalog.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelocInfo {
    pub start_rms: Seconds,
    pub final_rms: Seconds,
    pub num_tt_obs: u32,
    pub num_cc_obs: u32,
    pub num_neighbours: u32,
    pub delta_lat: Degree,
    pub delta_lon: Degree,
    pub delta_depth: Kilometer,
    pub delta_time: Seconds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub time: Epoch,
    pub latitude: Degree,
    pub longitude: Degree,
    pub depth: Kilometer, // km, positive down
    pub magnitude: Option<f64>,
    pub reloc_info: Option<RelocInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    /// `net.sta.loc` without the component
    pub id: StationId,
    pub latitude: Degree,
    pub longitude: Degree,
    pub elevation: f64, // meters
    pub network: String,
    pub station: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub event_id: EventId,
    pub station_id: StationId,
    pub phase_type: PhaseType,
    pub time: Epoch,
    /// a-priori pick weight in [0,1]
    pub weight: f64,
    pub uncertainty: Option<Seconds>,
    pub is_manual: bool,
    /// component code of the channel the pick was made on (e.g. "Z")
    pub component: String,
    /// true for phases synthesised from neighbouring events
    pub is_theoretical: bool,
}

/// Key of the phase table: `(event, station, phase type)` is unique.
pub type PhaseKey = (EventId, StationId, PhaseType);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    events: BTreeMap<EventId, Event>,
    stations: BTreeMap<StationId, Station>,
    phases: BTreeMap<PhaseKey, Phase>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an event.
    pub fn add_event(&mut self, event: Event) {
        self.events.insert(event.id, event);
    }

    /// Insert or replace a station.
    pub fn add_station(&mut self, station: Station) {
        self.stations.insert(station.id.clone(), station);
    }

    /// Insert a phase, enforcing referential integrity. A phase with the
    /// same `(event, station, type)` triple replaces the previous one.
    pub fn add_phase(&mut self, phase: Phase) -> Result<(), SeisddError> {
        if !self.events.contains_key(&phase.event_id) {
            return Err(SeisddError::InvalidCatalog(format!(
                "phase references unknown event {}",
                phase.event_id
            )));
        }
        if !self.stations.contains_key(&phase.station_id) {
            return Err(SeisddError::InvalidCatalog(format!(
                "phase references unknown station {}",
                phase.station_id
            )));
        }
        let key = (phase.event_id, phase.station_id.clone(), phase.phase_type);
        self.phases.insert(key, phase);
        Ok(())
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.values()
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn phase(&self, event: EventId, station: &str, phase_type: PhaseType) -> Option<&Phase> {
        self.phases
            .get(&(event, station.to_string(), phase_type))
    }

    /// All phases of one event, ordered by station id then phase type.
    pub fn phases_of(&self, event: EventId) -> impl Iterator<Item = &Phase> {
        self.phases
            .range((event, String::new(), PhaseType::P)..)
            .take_while(move |((ev, _, _), _)| *ev == event)
            .map(|(_, phase)| phase)
    }

    /// Replace an event record, keeping its phases.
    pub fn replace_event(&mut self, event: Event) -> Result<(), SeisddError> {
        if !self.events.contains_key(&event.id) {
            return Err(SeisddError::InvalidCatalog(format!(
                "cannot replace unknown event {}",
                event.id
            )));
        }
        self.events.insert(event.id, event);
        Ok(())
    }

    /// Copy one event, its phases and the referenced stations into a new
    /// single-event catalog.
    pub fn extract_event(&self, id: EventId) -> Result<Catalog, SeisddError> {
        let event = self
            .event(id)
            .ok_or_else(|| SeisddError::InvalidCatalog(format!("unknown event {id}")))?;
        let mut out = Catalog::new();
        out.add_event(event.clone());
        for phase in self.phases_of(id) {
            if let Some(station) = self.station(&phase.station_id) {
                out.add_station(station.clone());
            }
            out.add_phase(phase.clone())?;
        }
        Ok(out)
    }

    /// Merge another catalog into this one. Colliding ids are replaced.
    pub fn merge(&mut self, other: &Catalog) -> Result<(), SeisddError> {
        for station in other.stations() {
            self.add_station(station.clone());
        }
        for event in other.events() {
            self.add_event(event.clone());
        }
        for phase in other.phases() {
            self.add_phase(phase.clone())?;
        }
        Ok(())
    }

    /// Check referential integrity of the whole catalog.
    pub fn validate(&self) -> Result<(), SeisddError> {
        for phase in self.phases.values() {
            if !self.events.contains_key(&phase.event_id) {
                return Err(SeisddError::InvalidCatalog(format!(
                    "phase at {} references unknown event {}",
                    phase.station_id, phase.event_id
                )));
            }
            if !self.stations.contains_key(&phase.station_id) {
                return Err(SeisddError::InvalidCatalog(format!(
                    "phase of event {} references unknown station {}",
                    phase.event_id, phase.station_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod catalog_test {
    use super::*;
    use crate::time::parse_timestamp;

    fn sample_station(id: &str) -> Station {
        Station {
            id: id.to_string(),
            latitude: 46.0,
            longitude: 7.0,
            elevation: 1200.0,
            network: "CH".into(),
            station: id.split('.').nth(1).unwrap_or(id).to_string(),
            location: String::new(),
        }
    }

    fn sample_event(id: EventId) -> Event {
        Event {
            id,
            time: parse_timestamp("2021-03-01T10:00:00").unwrap(),
            latitude: 46.1,
            longitude: 7.1,
            depth: 5.0,
            magnitude: Some(2.3),
            reloc_info: None,
        }
    }

    fn sample_phase(ev: EventId, sta: &str, ptype: PhaseType) -> Phase {
        Phase {
            event_id: ev,
            station_id: sta.to_string(),
            phase_type: ptype,
            time: parse_timestamp("2021-03-01T10:00:02.500").unwrap(),
            weight: 1.0,
            uncertainty: Some(0.05),
            is_manual: true,
            component: "Z".into(),
            is_theoretical: false,
        }
    }

    #[test]
    fn phase_requires_event_and_station() {
        let mut cat = Catalog::new();
        cat.add_station(sample_station("CH.SIM.00"));
        let err = cat.add_phase(sample_phase(1, "CH.SIM.00", PhaseType::P));
        assert!(matches!(err, Err(SeisddError::InvalidCatalog(_))));

        cat.add_event(sample_event(1));
        assert!(cat.add_phase(sample_phase(1, "CH.SIM.00", PhaseType::P)).is_ok());
        let err = cat.add_phase(sample_phase(1, "CH.XXX.00", PhaseType::P));
        assert!(matches!(err, Err(SeisddError::InvalidCatalog(_))));
    }

    #[test]
    fn phase_triple_is_unique() {
        let mut cat = Catalog::new();
        cat.add_station(sample_station("CH.SIM.00"));
        cat.add_event(sample_event(1));
        cat.add_phase(sample_phase(1, "CH.SIM.00", PhaseType::P)).unwrap();
        let mut other = sample_phase(1, "CH.SIM.00", PhaseType::P);
        other.weight = 0.5;
        cat.add_phase(other).unwrap();
        assert_eq!(cat.phases().count(), 1);
        assert_eq!(cat.phase(1, "CH.SIM.00", PhaseType::P).unwrap().weight, 0.5);
    }

    #[test]
    fn phases_of_is_ordered_and_scoped() {
        let mut cat = Catalog::new();
        cat.add_station(sample_station("CH.BBB.00"));
        cat.add_station(sample_station("CH.AAA.00"));
        cat.add_event(sample_event(1));
        cat.add_event(sample_event(2));
        cat.add_phase(sample_phase(1, "CH.BBB.00", PhaseType::S)).unwrap();
        cat.add_phase(sample_phase(2, "CH.AAA.00", PhaseType::P)).unwrap();
        cat.add_phase(sample_phase(1, "CH.AAA.00", PhaseType::P)).unwrap();
        cat.add_phase(sample_phase(1, "CH.BBB.00", PhaseType::P)).unwrap();

        let got: Vec<_> = cat
            .phases_of(1)
            .map(|p| (p.station_id.clone(), p.phase_type))
            .collect();
        assert_eq!(
            got,
            vec![
                ("CH.AAA.00".to_string(), PhaseType::P),
                ("CH.BBB.00".to_string(), PhaseType::P),
                ("CH.BBB.00".to_string(), PhaseType::S),
            ]
        );
    }

    #[test]
    fn extract_event_carries_stations() {
        let mut cat = Catalog::new();
        cat.add_station(sample_station("CH.SIM.00"));
        cat.add_event(sample_event(1));
        cat.add_event(sample_event(2));
        cat.add_phase(sample_phase(1, "CH.SIM.00", PhaseType::P)).unwrap();

        let single = cat.extract_event(1).unwrap();
        assert_eq!(single.num_events(), 1);
        assert_eq!(single.stations().count(), 1);
        assert_eq!(single.phases().count(), 1);
        single.validate().unwrap();
    }
}
