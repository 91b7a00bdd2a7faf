use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Only the tail of the position file is read; the latest line is all we need.
const TAIL_LEN: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionState {
    pub heading_deg: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub time_secs_utc: f64,
}

impl PositionState {
    /// Parse `heading latitude longitude altitude timestamp`.
    pub fn parse(line: &str) -> Option<PositionState> {
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if fields.len() != 5 {
            return None;
        }
        Some(PositionState {
            heading_deg: fields[0],
            latitude: fields[1],
            longitude: fields[2],
            altitude_m: fields[3],
            time_secs_utc: fields[4],
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(-180.0..=360.0).contains(&self.heading_deg) {
            return Err(format!("heading {} out of range", self.heading_deg));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} out of range", self.latitude));
        }
        if !(-180.0..=360.0).contains(&self.longitude) {
            return Err(format!("longitude {} out of range", self.longitude));
        }
        if !(-1000.0..=30000.0).contains(&self.altitude_m) {
            return Err(format!("altitude {} out of range", self.altitude_m));
        }
        Ok(())
    }
}

/// Keeps the platform position and heading up to date from a text file that
/// another process rewrites. Polled from the reader loop.
pub struct PositionUpdater {
    path: PathBuf,
    check_interval: Duration,
    last_check: Option<Instant>,
    last_modified: Option<SystemTime>,
    state: Option<PositionState>,
}

impl PositionUpdater {
    pub fn new(path: &Path, check_interval_secs: f64) -> Self {
        PositionUpdater {
            path: path.to_owned(),
            check_interval: Duration::from_secs_f64(check_interval_secs.max(0.0)),
            last_check: None,
            last_modified: None,
            state: None,
        }
    }

    pub fn position(&self) -> Option<&PositionState> {
        self.state.as_ref()
    }

    /// Re-read the file if the check interval has passed and it has changed.
    /// Returns true when the position was updated.
    pub fn maybe_refresh(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.check_interval {
                return false;
            }
        }
        self.last_check = Some(now);

        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot stat position file '{}': {}", self.path.display(), e);
                return false;
            }
        };
        if self.last_modified == Some(modified) {
            return false;
        }

        let tail = match read_tail(&self.path, TAIL_LEN) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot read position file '{}': {}", self.path.display(), e);
                return false;
            }
        };

        let Some(position) = tail.lines().rev().find_map(PositionState::parse) else {
            warn!("No position found in '{}'", self.path.display());
            return false;
        };

        if let Err(e) = position.validate() {
            error!(
                "Position in '{}' rejected: {}; keeping previous position",
                self.path.display(),
                e
            );
            return false;
        }
        // Only a good read settles this mtime; a rejected one is retried
        self.last_modified = Some(modified);

        if self.state.is_none() {
            info!(
                "Position: lat {:.5} lon {:.5} alt {:.0} m heading {:.1}",
                position.latitude, position.longitude, position.altitude_m, position.heading_deg
            );
        } else {
            debug!("Position updated: {:?}", position);
        }
        self.state = Some(position);
        true
    }
}

fn read_tail(path: &Path, max_len: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len > max_len {
        file.seek(SeekFrom::Start(len - max_len))?;
    }
    let mut buf = Vec::with_capacity(max_len.min(len) as usize);
    file.read_to_end(&mut buf)?;
    // The seek may have landed inside a line, or a multi-byte character
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn write_file(path: &Path, contents: &str, mtime_secs: u64) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
            .unwrap();
    }

    #[test]
    fn parse_fields() {
        let p = PositionState::parse("  12.5 45.0 -100.0 1500 1000.25 ").unwrap();
        assert_eq!(p.heading_deg, 12.5);
        assert_eq!(p.latitude, 45.0);
        assert_eq!(p.longitude, -100.0);
        assert_eq!(p.altitude_m, 1500.0);
        assert_eq!(p.time_secs_utc, 1000.25);

        assert!(PositionState::parse("12.5 45.0 -100.0 1500").is_none());
        assert!(PositionState::parse("12.5 45.0 -100.0 1500 x").is_none());
        assert!(PositionState::parse("").is_none());
    }

    #[test]
    fn reads_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(
            &path,
            "10 40.0 -105.0 1600 1\n20 41.0 -104.0 1700 2\nheader junk\n",
            1000,
        );
        let mut updater = PositionUpdater::new(&path, 0.0);
        assert!(updater.maybe_refresh(Instant::now()));
        let p = updater.position().unwrap();
        assert_eq!(p.heading_deg, 20.0);
        assert_eq!(p.latitude, 41.0);
    }

    #[test]
    fn out_of_range_line_keeps_old_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(&path, "30 45.0 -100.0 1500 900\n", 1000);
        let mut updater = PositionUpdater::new(&path, 0.0);
        assert!(updater.maybe_refresh(Instant::now()));
        let before = *updater.position().unwrap();

        write_file(&path, "400 45.0 -100.0 1500 1000\n", 2000);
        assert!(!updater.maybe_refresh(Instant::now()));
        assert_eq!(*updater.position().unwrap(), before);
    }

    #[test]
    fn unchanged_file_is_not_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(&path, "30 45.0 -100.0 1500 900\n", 1000);
        let mut updater = PositionUpdater::new(&path, 0.0);
        assert!(updater.maybe_refresh(Instant::now()));

        // Same mtime: contents are not looked at
        write_file(&path, "50 46.0 -100.0 1500 901\n", 1000);
        assert!(!updater.maybe_refresh(Instant::now()));
        assert_eq!(updater.position().unwrap().heading_deg, 30.0);
    }

    #[test]
    fn rejected_read_is_retried_at_same_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(&path, "400 45.0 -100.0 1500 1000
", 2000);
        let mut updater = PositionUpdater::new(&path, 0.0);
        assert!(!updater.maybe_refresh(Instant::now()));
        assert!(updater.position().is_none());

        // Rewritten within the same mtime granularity
        write_file(&path, "40 45.0 -100.0 1500 1000
", 2000);
        assert!(updater.maybe_refresh(Instant::now()));
        assert_eq!(updater.position().unwrap().heading_deg, 40.0);
    }

    #[test]
    fn check_interval_throttles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(&path, "30 45.0 -100.0 1500 900\n", 1000);
        let mut updater = PositionUpdater::new(&path, 60.0);
        let start = Instant::now();
        assert!(updater.maybe_refresh(start));

        write_file(&path, "50 46.0 -100.0 1500 901\n", 2000);
        assert!(!updater.maybe_refresh(start + Duration::from_secs(1)));
        assert!(updater.maybe_refresh(start + Duration::from_secs(61)));
        assert_eq!(updater.position().unwrap().heading_deg, 50.0);
    }

    #[test]
    fn only_the_tail_of_a_large_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.txt");
        write_file(&path, "", 1000);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        for i in 0..2000 {
            writeln!(file, "{} 45.0 -100.0 1500 {}", i % 360, i).unwrap();
        }
        drop(file);
        let mut updater = PositionUpdater::new(&path, 0.0);
        assert!(updater.maybe_refresh(Instant::now()));
        assert_eq!(updater.position().unwrap().time_secs_utc, 1999.0);
    }

    #[test]
    fn missing_file_leaves_no_position() {
        let mut updater = PositionUpdater::new(Path::new("/nonexistent/pos.txt"), 0.0);
        assert!(!updater.maybe_refresh(Instant::now()));
        assert!(updater.position().is_none());
    }
}
