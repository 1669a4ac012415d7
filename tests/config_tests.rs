//! Configuration tests

#[cfg(test)]
mod tests {
    use sophon::config::{EngineConfig, HostOverride};
    use sophon::types::{ChunkSize, Coordinate, MAX_COORD};
    use std::io::Write;

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    #[test]
    fn defaults_match_explorer_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.chunk_size, ChunkSize::S256);
        assert_eq!(cfg.planet_rarity, 16384);
        assert_eq!(cfg.world_radius, 40_500);
        assert_eq!(cfg.init_coords, Coordinate::origin());
        assert_eq!(cfg.terrain_floor, 0.0);
        assert!(cfg.explore_cores >= 1);
        assert!(cfg.radius_updates);
        assert_eq!(cfg.reconcile.guard_fraction, 0.95);
        assert!(cfg.validate().is_ok());
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.planet_rarity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.reconcile.guard_fraction = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.init_coords = Coordinate::new(MAX_COORD + 1, 0);
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.init_coords = Coordinate::new(i64::MIN, i64::MIN);
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.queue_depth = 0;
        assert!(cfg.validate().is_err());
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    #[test]
    fn file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
seed = 77
chunk_size = 64
world_radius = 1000
queue_depth = 8
space_thresholds = [14.0, 18.0]
init_coords = {{ x = 10, y = -20 }}

[reconcile]
guard_fraction = 0.5
"#
        )
        .unwrap();

        let cfg = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.seed, 77);
        assert_eq!(cfg.chunk_size, ChunkSize::S64);
        assert_eq!(cfg.world_radius, 1000);
        assert_eq!(cfg.init_coords, Coordinate::new(10, -20));
        assert_eq!(cfg.space_thresholds, (14.0, 18.0));
        assert_eq!(cfg.reconcile.guard_fraction, 0.5);
        assert_eq!(cfg.planet_rarity, 16384, "unset keys keep defaults");

        std::env::set_var("SOPHON_QUEUE_DEPTH", "3");
        std::env::set_var("SOPHON_RECONCILE__GUARD_FRACTION", "0.25");
        let cfg = EngineConfig::load(Some(file.path())).unwrap();
        std::env::remove_var("SOPHON_QUEUE_DEPTH");
        std::env::remove_var("SOPHON_RECONCILE__GUARD_FRACTION");
        assert_eq!(cfg.queue_depth, 3);
        assert_eq!(cfg.reconcile.guard_fraction, 0.25);
        assert_eq!(cfg.seed, 77);
    }

    #[test]
    fn unsupported_chunk_size_in_file_fails() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "chunk_size = 48").unwrap();
        assert!(EngineConfig::load(Some(file.path())).is_err());
    }
    #[test]
    fn host_overrides_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let config = dir.path().join("sophon.toml");
        std::fs::write(
            &config,
            format!("seed = 5\nworld_radius = 1000\nstate_path = '{}'\n", state.display()),
        )
        .unwrap();

        let cfg = EngineConfig::load(Some(&config)).unwrap();
        assert_eq!(cfg.world_radius, 1000, "no state file yet");

        HostOverride::WorldRadius(5_000).persist(&state).unwrap();
        HostOverride::InitCoords(Coordinate::new(-32, 48)).persist(&state).unwrap();

        let cfg = EngineConfig::load(Some(&config)).unwrap();
        assert_eq!(cfg.world_radius, 5_000);
        assert_eq!(cfg.init_coords, Coordinate::new(-32, 48));
        assert_eq!(cfg.seed, 5);

        HostOverride::WorldRadius(6_000).persist(&state).unwrap();
        let cfg = EngineConfig::load(Some(&config)).unwrap();
        assert_eq!(cfg.world_radius, 6_000);
        assert_eq!(cfg.init_coords, Coordinate::new(-32, 48), "other keys kept");
    }
}
