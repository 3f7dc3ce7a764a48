mod config;
mod map_client;
mod object_client;

use std::sync::Arc;

use aro::{AroManager, ChannelFeed, ObjectStore, Prefab, RealtimeSync};
use clap::{Parser, Subcommand};
use foundation::{
    ecef_to_enu, ecef_to_wgs84, map_local_to_wgs84, wgs84_to_ecef, wgs84_to_map_local, LatLon,
    MapId, MapToEcef, Wgs84,
};
use maps::{
    distances_m, eligible_candidates, rank_by_distance, shared_registry, AuthScope,
    HeadlessEngine, LocationProvider, MapJob, MapLifecycle, MapService, NearbyMapPoller,
    NearbyQuery, StaticLocation,
};
use runtime::{CancelToken, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::map_client::RestMapService;
use crate::object_client::RestObjectStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Geo-located AR map client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List maps around a position, nearest first, without loading them
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        radius: Option<f64>,
        /// Also list public maps
        #[arg(long)]
        public: bool,
    },
    /// Keep the nearest maps loaded until interrupted
    Run {
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        alt: f64,
    },
    /// Convert a geographic position to ECEF and to a local frame at an origin
    Geo {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        alt: f64,
        #[arg(long, allow_hyphen_values = true)]
        origin_lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        origin_lon: Option<f64>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        origin_alt: f64,
    },
    /// Show or edit the AR objects placed on a map
    Scene {
        #[arg(long)]
        map_id: i32,
        /// Add a diamond at the given position
        #[arg(long)]
        add_diamond: bool,
        /// Add a poster showing this image URL
        #[arg(long)]
        add_poster: Option<String>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        at_lat: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        at_lon: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        at_alt: f64,
        /// Delete an object by id
        #[arg(long)]
        delete: Option<String>,
        /// Delete every object in the scene
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Command::Nearby {
            lat,
            lon,
            radius,
            public,
        } => nearby(&config, LatLon::new(lat, lon), radius, public).await,
        Command::Run { lat, lon, alt } => {
            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => StaticLocation::at(Wgs84::new(lat, lon, alt)),
                _ => StaticLocation::unknown(),
            };
            run(config, location).await
        }
        Command::Geo {
            lat,
            lon,
            alt,
            origin_lat,
            origin_lon,
            origin_alt,
        } => {
            let point = Wgs84::new(lat, lon, alt);
            let origin = Wgs84::new(origin_lat.unwrap_or(lat), origin_lon.unwrap_or(lon), origin_alt);
            geo(point, origin);
            Ok(())
        }
        Command::Scene {
            map_id,
            add_diamond,
            add_poster,
            at_lat,
            at_lon,
            at_alt,
            delete,
            clear,
        } => {
            let prefab = match (add_poster, add_diamond) {
                (Some(url), _) => Some(Prefab::Poster { url: Some(url) }),
                (None, true) => Some(Prefab::Diamond),
                (None, false) => None,
            };
            let edit = SceneEdit {
                add: prefab.map(|p| (p, Wgs84::new(at_lat, at_lon, at_alt))),
                delete,
                clear,
            };
            scene(&config, MapId::new(map_id), edit).await
        }
    }
}

fn map_service(config: &Config) -> Result<Arc<RestMapService>, Box<dyn std::error::Error>> {
    Ok(Arc::new(RestMapService::new(
        config.map_api.clone(),
        config.map_token.clone(),
        config.poller.request_timeout,
    )?))
}

async fn nearby(
    config: &Config,
    center: LatLon,
    radius: Option<f64>,
    public: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = map_service(config)?;
    let radius_m = radius.unwrap_or(config.poller.radius_m);
    let mut scopes = Vec::new();
    if config.map_token.is_some() {
        scopes.push(AuthScope::Token);
    }
    if public || config.poller.include_public {
        scopes.push(AuthScope::Anonymous);
    }
    if scopes.is_empty() {
        warn!("no map token configured and public maps not requested; nothing to list");
    }

    let mut jobs: Vec<MapJob> = Vec::new();
    for scope in scopes {
        let query = NearbyQuery {
            center: Some(center),
            radius_m,
            scope,
        };
        jobs.extend(service.list_maps(query).await?);
    }

    let ranked = rank_by_distance(eligible_candidates(&jobs), Some(center));
    let distances = distances_m(&ranked, center);
    info!(count = ranked.len(), radius_m, "nearby maps");
    for (candidate, distance) in ranked.iter().zip(distances) {
        println!(
            "{:>8}  {:>9.1} m  {:<7}  {:?}  {}",
            candidate.id.0,
            distance,
            candidate.privacy.as_wire(),
            candidate.status,
            candidate.name
        );
    }
    Ok(())
}

async fn run(config: Config, location: StaticLocation) -> Result<(), Box<dyn std::error::Error>> {
    let service = map_service(&config)?;
    let engine = Arc::new(HeadlessEngine::new());
    let registry = shared_registry();
    let events = EventBus::new();
    let cancel = CancelToken::new();

    if location.current_fix().is_none() {
        info!("no position given; every listed map is a candidate");
    }

    let mut rx = events.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    seq = event.seq,
                    kind = event.notification.kind(),
                    notification = ?event.notification,
                    "event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let lifecycle = MapLifecycle::new(
        engine.clone(),
        service.clone(),
        registry.clone(),
        events.clone(),
        cancel.clone(),
    );
    let mut poller = NearbyMapPoller::new(service, Arc::new(location), lifecycle, config.poller.clone());
    info!(
        interval_ms = config.poller.interval.as_millis() as u64,
        radius_m = config.poller.radius_m,
        max_loaded = config.poller.max_loaded,
        "polling for nearby maps"
    );
    let task = tokio::spawn(async move {
        poller.run().await;
        poller
    });

    tokio::signal::ctrl_c().await?;
    info!("stopping");
    cancel.cancel();

    let poller = task.await?;
    let mut lifecycle = poller.into_lifecycle();
    let unloaded = lifecycle.unload_all();
    info!(
        unloaded = unloaded.len(),
        engine_maps = engine.loaded_handles().len(),
        "shut down"
    );

    logger.abort();
    Ok(())
}

fn geo(point: Wgs84, origin: Wgs84) {
    let ecef = wgs84_to_ecef(point);
    let back = ecef_to_wgs84(ecef);
    let enu = ecef_to_enu(ecef, origin);
    let map = MapToEcef::enu_at(origin);
    let local = wgs84_to_map_local(point, &map);
    let round_trip = map_local_to_wgs84(local, &map);

    println!("ecef       x={:.3} y={:.3} z={:.3}", ecef.x, ecef.y, ecef.z);
    println!(
        "wgs84      lat={:.9} lon={:.9} alt={:.3}",
        back.lat_deg, back.lon_deg, back.alt_m
    );
    println!("enu        e={:.3} n={:.3} u={:.3}", enu.east, enu.north, enu.up);
    println!("map-local  x={:.3} y={:.3} z={:.3}", local.x, local.y, local.z);
    println!(
        "map->wgs84 lat={:.9} lon={:.9} alt={:.3}",
        round_trip.lat_deg, round_trip.lon_deg, round_trip.alt_m
    );
}

struct SceneEdit {
    add: Option<(Prefab, Wgs84)>,
    delete: Option<String>,
    clear: bool,
}

async fn scene(config: &Config, map_id: MapId, edit: SceneEdit) -> Result<(), Box<dyn std::error::Error>> {
    let Some(store_config) = config.object_store.clone() else {
        return Err("object store not configured (set GEOAR_PARSE_URL and GEOAR_PARSE_APP_ID)".into());
    };
    let store: Arc<dyn ObjectStore> = Arc::new(RestObjectStore::new(
        store_config,
        config.poller.request_timeout,
    )?);

    // Remote change delivery is not wired up here; edits are applied locally.
    let sync = RealtimeSync::new(Arc::new(ChannelFeed::new()), shared_registry(), EventBus::new());
    let mut manager = AroManager::new(store, sync, config.author.clone());
    manager.on_localized(map_id).await?;

    if let Some(id) = edit.delete {
        manager.delete_object(&id).await?;
        info!(object_id = %id, "deleted");
    }
    if edit.clear {
        let removed = manager.delete_all_objects().await?;
        info!(removed, "scene cleared");
    }
    if let Some((prefab, position)) = edit.add {
        let object = manager
            .add_object(prefab.to_data(), prefab.index(), position)
            .await?;
        info!(object_id = %object.id, "added");
    }

    if let Some(scene) = manager.current_scene() {
        println!("scene {} (map {})", scene.id, scene.map_id());
    }
    for object in manager.sync().objects() {
        let p = object.position();
        println!(
            "{:<12} {:?}  lat={:.7} lon={:.7} alt={:.2}  by {}",
            object.id,
            object.prefab(),
            p.lat_deg,
            p.lon_deg,
            p.alt_m,
            object.author
        );
    }
    Ok(())
}
