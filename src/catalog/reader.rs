//! Plain-text catalog loader.
//!
//! A catalog is exchanged as three CSV tables with header rows:
//!
//! * `station.csv`: `id,latitude,longitude,elevation,network,station,location`
//! * `event.csv`:   `id,time,latitude,longitude,depth,magnitude`
//! * `phase.csv`:   `eventId,stationId,type,time,weight,uncertainty,isManual,component`
//!
//! Empty `magnitude`/`uncertainty` cells mean "unknown". Any structural
//! problem (missing column, unparsable number, dangling reference) aborts
//! the load with `InvalidCatalog`.

use std::fs;

use camino::Utf8Path;

use crate::catalog::{Catalog, Event, Phase, PhaseType, Station};
use crate::seisdd_errors::SeisddError;
use crate::time::parse_timestamp;

fn bad(file: &Utf8Path, line_no: usize, what: &str) -> SeisddError {
    SeisddError::InvalidCatalog(format!("{file}:{line_no}: {what}"))
}

fn parse_f64(field: &str, name: &str, file: &Utf8Path, line_no: usize) -> Result<f64, SeisddError> {
    field
        .trim()
        .parse()
        .map_err(|_| bad(file, line_no, &format!("bad {name} value '{field}'")))
}

fn split_fields<'a>(
    line: &'a str,
    expected: usize,
    file: &Utf8Path,
    line_no: usize,
) -> Result<Vec<&'a str>, SeisddError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(bad(
            file,
            line_no,
            &format!("expected {expected} fields, found {}", fields.len()),
        ));
    }
    Ok(fields)
}

/// Data lines of a CSV file, skipping the header and blank lines.
fn data_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .skip(1)
        .filter(|(_, l)| !l.is_empty())
}

pub fn read_stations(path: &Utf8Path, catalog: &mut Catalog) -> Result<(), SeisddError> {
    let content = fs::read_to_string(path)?;
    for (line_no, line) in data_lines(&content) {
        let f = split_fields(line, 7, path, line_no)?;
        catalog.add_station(Station {
            id: f[0].to_string(),
            latitude: parse_f64(f[1], "latitude", path, line_no)?,
            longitude: parse_f64(f[2], "longitude", path, line_no)?,
            elevation: parse_f64(f[3], "elevation", path, line_no)?,
            network: f[4].to_string(),
            station: f[5].to_string(),
            location: f[6].to_string(),
        });
    }
    Ok(())
}

pub fn read_events(path: &Utf8Path, catalog: &mut Catalog) -> Result<(), SeisddError> {
    let content = fs::read_to_string(path)?;
    for (line_no, line) in data_lines(&content) {
        let f = split_fields(line, 6, path, line_no)?;
        let id = f[0]
            .parse()
            .map_err(|_| bad(path, line_no, &format!("bad event id '{}'", f[0])))?;
        let magnitude = if f[5].is_empty() {
            None
        } else {
            Some(parse_f64(f[5], "magnitude", path, line_no)?)
        };
        catalog.add_event(Event {
            id,
            time: parse_timestamp(f[1])?,
            latitude: parse_f64(f[2], "latitude", path, line_no)?,
            longitude: parse_f64(f[3], "longitude", path, line_no)?,
            depth: parse_f64(f[4], "depth", path, line_no)?,
            magnitude,
            reloc_info: None,
        });
    }
    Ok(())
}

pub fn read_phases(path: &Utf8Path, catalog: &mut Catalog) -> Result<(), SeisddError> {
    let content = fs::read_to_string(path)?;
    for (line_no, line) in data_lines(&content) {
        let f = split_fields(line, 8, path, line_no)?;
        let event_id = f[0]
            .parse()
            .map_err(|_| bad(path, line_no, &format!("bad event id '{}'", f[0])))?;
        let phase_type = f[2]
            .chars()
            .next()
            .ok_or_else(|| bad(path, line_no, "empty phase type"))
            .and_then(PhaseType::from_char)?;
        let uncertainty = if f[5].is_empty() {
            None
        } else {
            Some(parse_f64(f[5], "uncertainty", path, line_no)?)
        };
        let weight = parse_f64(f[4], "weight", path, line_no)?;
        if !(0.0..=1.0).contains(&weight) {
            return Err(bad(path, line_no, &format!("weight {weight} outside [0,1]")));
        }
        catalog.add_phase(Phase {
            event_id,
            station_id: f[1].to_string(),
            phase_type,
            time: parse_timestamp(f[3])?,
            weight,
            uncertainty,
            is_manual: matches!(f[6], "1" | "true"),
            component: f[7].to_string(),
            is_theoretical: false,
        })?;
    }
    Ok(())
}

/// Load a full catalog from its three tables. Stations and events are
/// loaded first so that phase referential integrity can be enforced.
pub fn read_catalog(
    event_file: &Utf8Path,
    phase_file: &Utf8Path,
    station_file: &Utf8Path,
) -> Result<Catalog, SeisddError> {
    let mut catalog = Catalog::new();
    read_stations(station_file, &mut catalog)?;
    read_events(event_file, &mut catalog)?;
    read_phases(phase_file, &mut catalog)?;
    catalog.validate()?;
    Ok(catalog)
}

/// Write the event table of a (relocated) catalog.
pub fn write_events(catalog: &Catalog, path: &Utf8Path) -> Result<(), SeisddError> {
    let mut out = String::from("id,time,latitude,longitude,depth,magnitude\n");
    for ev in catalog.events() {
        let mag = ev.magnitude.map(|m| format!("{m:.2}")).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{:.6},{:.6},{:.3},{}\n",
            ev.id, ev.time, ev.latitude, ev.longitude, ev.depth, mag
        ));
    }
    fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod reader_test {
    use super::*;
    use camino::Utf8PathBuf;

    fn write_tmp(name: &str, content: &str) -> Utf8PathBuf {
        let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn read_full_catalog() {
        let stations = write_tmp(
            "seisdd_reader_station.csv",
            "id,latitude,longitude,elevation,network,station,location\n\
             CH.SIM.00,46.2,7.1,1200,CH,SIM,00\n",
        );
        let events = write_tmp(
            "seisdd_reader_event.csv",
            "id,time,latitude,longitude,depth,magnitude\n\
             1,2021-03-01T10:00:00,46.1,7.0,5.5,2.1\n\
             2,2021-03-01T11:00:00,46.11,7.01,5.2,\n",
        );
        let phases = write_tmp(
            "seisdd_reader_phase.csv",
            "eventId,stationId,type,time,weight,uncertainty,isManual,component\n\
             1,CH.SIM.00,P,2021-03-01T10:00:02.100,1.0,0.05,1,Z\n\
             2,CH.SIM.00,S,2021-03-01T11:00:04.250,0.75,,0,N\n",
        );

        let cat = read_catalog(&events, &phases, &stations).unwrap();
        assert_eq!(cat.num_events(), 2);
        assert_eq!(cat.event(2).unwrap().magnitude, None);
        let ph = cat.phase(2, "CH.SIM.00", PhaseType::S).unwrap();
        assert_eq!(ph.weight, 0.75);
        assert_eq!(ph.uncertainty, None);
        assert!(!ph.is_manual);
    }

    #[test]
    fn dangling_phase_is_fatal() {
        let stations = write_tmp(
            "seisdd_reader_station2.csv",
            "id,latitude,longitude,elevation,network,station,location\n\
             CH.SIM.00,46.2,7.1,1200,CH,SIM,00\n",
        );
        let events = write_tmp(
            "seisdd_reader_event2.csv",
            "id,time,latitude,longitude,depth,magnitude\n\
             1,2021-03-01T10:00:00,46.1,7.0,5.5,2.1\n",
        );
        let phases = write_tmp(
            "seisdd_reader_phase2.csv",
            "eventId,stationId,type,time,weight,uncertainty,isManual,component\n\
             7,CH.SIM.00,P,2021-03-01T10:00:02.100,1.0,,1,Z\n",
        );
        let err = read_catalog(&events, &phases, &stations);
        assert!(matches!(err, Err(SeisddError::InvalidCatalog(_))));
    }
}
