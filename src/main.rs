use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use flate2::read::GzDecoder;
use serde::Deserialize;

use wayfinder_rs::analytics::{AnalyticsSink, HttpAnalytics, RecordingSink};
use wayfinder_rs::calibration::{CalibrationDecision, CalibrationOutcome};
use wayfinder_rs::catalog::PoiCatalog;
use wayfinder_rs::live_status::LiveStatus;
use wayfinder_rs::{
    Destination, Fix, GeoPoint, GuidanceConfig, GuidanceOutput, GuidanceState, Navigator,
    ReplacePolicy, SensorEvent,
};

#[derive(Parser, Debug)]
#[command(name = "wayfinder")]
#[command(about = "Replay a recorded walk through the pedestrian guidance engine", long_about = None)]
struct Args {
    /// Trace file (.json or .json.gz)
    trace: PathBuf,

    /// Guidance config JSON; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the relaxed arrival preset (15 m floor, 1.5 × accuracy)
    #[arg(long, conflicts_with = "config")]
    relaxed: bool,

    /// Override the fix accuracy ceiling (meters)
    #[arg(long)]
    max_accuracy: Option<f64>,

    /// POI catalog JSON, used with --dest-id when the trace has no destination
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Destination POI id
    #[arg(long, requires = "catalog")]
    dest_id: Option<i64>,

    /// Entry origin as "lat,lon"; the first fix is checked against it
    #[arg(long)]
    origin: Option<GeoPoint>,

    /// What to do when the first fix is too far from the entry origin
    #[arg(long, value_enum, default_value = "start")]
    on_far: FarPolicy,

    /// Analytics backend base URL (e.g. http://localhost:3000/api)
    #[arg(long)]
    analytics_url: Option<String>,

    /// Visitor type for the analytics usage session
    #[arg(long, default_value_t = 1)]
    user_type: i64,

    /// Log this search against the catalog before replaying
    #[arg(long, requires = "catalog")]
    search: Option<String>,

    /// Write a live status snapshot here after every event
    #[arg(long)]
    status_out: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FarPolicy {
    /// Start from where the user is
    Start,
    /// Move the entry origin to the user, then start
    Reanchor,
    /// Do not start guidance
    Abort,
}

#[derive(Deserialize)]
struct TraceFix {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
}

#[derive(Deserialize)]
struct HeadingReading {
    degrees: Option<f64>,
}

#[derive(Deserialize)]
struct TraceEvent {
    timestamp: f64,
    fix: Option<TraceFix>,
    heading: Option<HeadingReading>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Trace {
    destination: Option<Destination>,
    events: Vec<TraceEvent>,
}

impl TraceEvent {
    fn into_sensor_events(self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        if let Some(heading) = self.heading {
            events.push(SensorEvent::Heading {
                degrees: heading.degrees,
            });
        }
        if let Some(fix) = self.fix {
            events.push(SensorEvent::Fix(Fix::new(
                fix.latitude,
                fix.longitude,
                fix.accuracy,
                self.timestamp,
            )));
        }
        if let Some(message) = self.error {
            events.push(SensorEvent::SensorError { message });
        }
        events
    }
}

fn load_trace(path: &Path) -> Result<Trace> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn load_config(args: &Args) -> Result<GuidanceConfig> {
    let mut config = match &args.config {
        Some(path) => GuidanceConfig::load(path)?,
        None if args.relaxed => GuidanceConfig::relaxed(),
        None => GuidanceConfig::default(),
    };
    if let Some(max_accuracy) = args.max_accuracy {
        config.max_accuracy_m = max_accuracy;
        config.validate()?;
    }
    Ok(config)
}

fn resolve_destination(trace: &Trace, catalog: Option<&PoiCatalog>, dest_id: Option<i64>) -> Result<Destination> {
    if let (Some(catalog), Some(id)) = (catalog, dest_id) {
        return match catalog.find(id) {
            Some(poi) => Ok(poi.to_destination()),
            None => bail!("POI #{} not in catalog ({} entries)", id, catalog.len()),
        };
    }
    match &trace.destination {
        Some(destination) => Ok(destination.clone()),
        None => bail!("trace has no destination; pass --catalog and --dest-id"),
    }
}

fn report(output: &GuidanceOutput) {
    match output {
        GuidanceOutput::Render(render) => println!(
            "  -> {:>6.1} m  bearing {:>5.1}°  yaw {:>6.1}°  scale {:.2}{}",
            render.distance_meters,
            render.bearing_degrees,
            render.yaw_degrees,
            render.scale_factor,
            if render.near_destination { "  (near)" } else { "" }
        ),
        GuidanceOutput::LowQuality { message, .. } => println!("  !! {}", message),
        GuidanceOutput::SensorStatus(message) => println!("  !! {}", message),
        GuidanceOutput::Completed(record) => println!(
            "  == {} #{}: {} m in {} s",
            if record.completed { "ARRIVED" } else { "STOPPED" },
            record.destination_id,
            record.distance_meters,
            record.duration_seconds
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let trace = load_trace(&args.trace)?;
    let catalog = match &args.catalog {
        Some(path) => Some(PoiCatalog::load(path)?),
        None => None,
    };
    let destination = resolve_destination(&trace, catalog.as_ref(), args.dest_id)?;

    let analytics = args.analytics_url.as_ref().map(HttpAnalytics::new);
    if let Some(client) = &analytics {
        if let Err(e) = client.start_session(args.user_type).await {
            log::warn!("Analytics unavailable: {}", e);
        }
    }

    if let (Some(catalog), Some(query)) = (&catalog, &args.search) {
        let hits = catalog.search(query);
        println!("Search {:?}: {} result(s)", query, hits.len());
        for poi in &hits {
            println!("  #{} {}", poi.id, poi.name);
        }
        if let Some(client) = &analytics {
            if let Err(e) = client.register_search(query, hits.len()).await {
                log::warn!("Search not logged: {}", e);
            }
        }
    }

    println!(
        "Guiding to {} (#{}) at ({:.6}, {:.6}), {} events",
        destination.name,
        destination.id,
        destination.position.latitude,
        destination.position.longitude,
        trace.events.len()
    );

    let local = RecordingSink::new();
    let mut navigator = Navigator::new(config);
    navigator.select_destination(destination);

    let events: Vec<(f64, Vec<SensorEvent>)> = trace
        .events
        .into_iter()
        .map(|e| (e.timestamp, e.into_sensor_events()))
        .collect();
    let start_time = events.first().map(|(t, _)| *t).unwrap_or_default();

    if let Some(origin) = args.origin {
        navigator.begin_calibration(Some(origin))?;
        let first_fix = events.iter().flat_map(|(_, evs)| evs).find_map(|ev| match ev {
            SensorEvent::Fix(fix) => Some(fix.position),
            _ => None,
        });
        let Some(position) = first_fix else {
            bail!("trace has no fixes to check against the entry origin");
        };
        if let CalibrationOutcome::OutOfRange { distance_m, position } = navigator.check_entry(position)? {
            println!("First fix is {:.0} m from the entry origin ({:?})", distance_m, args.on_far);
            let decision = match args.on_far {
                FarPolicy::Start => CalibrationDecision::StartAnyway,
                FarPolicy::Reanchor => CalibrationDecision::Reanchor(position),
                FarPolicy::Abort => CalibrationDecision::Abort,
            };
            if !navigator.resolve_calibration(decision)? {
                println!("Guidance aborted");
                return Ok(());
            }
        }
    }

    for output in navigator.start(ReplacePolicy::FinishPrevious, start_time)? {
        report(&output);
    }

    let mut last_time = start_time;
    for (timestamp, sensor_events) in events {
        last_time = timestamp;
        for event in sensor_events {
            for output in navigator.handle(event) {
                report(&output);
                if let GuidanceOutput::Completed(record) = output {
                    local.record_navigation(record);
                }
            }
        }
        if let Some(path) = &args.status_out {
            LiveStatus::capture(&navigator)
                .save(path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        if navigator.state() == GuidanceState::Arrived {
            break;
        }
    }

    for output in navigator.teardown(last_time) {
        report(&output);
        if let GuidanceOutput::Completed(record) = output {
            local.record_navigation(record);
        }
    }

    if let Some(client) = &analytics {
        for record in local.records() {
            if let Err(e) = client.send_navigation(&record).await {
                log::warn!("Failed to record navigation: {}", e);
            }
        }
        if let Err(e) = client.end_session().await {
            log::warn!("session/end failed: {}", e);
        }
    }

    match local.records().last() {
        Some(record) => println!(
            "Session: completed={} distance={} m duration={} s",
            record.completed, record.distance_meters, record.duration_seconds
        ),
        None => println!("Session: no fixes accepted, nothing recorded"),
    }
    Ok(())
}
