#[cfg(test)]
mod config_tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use crate::config::{load_config, DataSource, SplitConfig};
    use crate::errors::ConfigError;
    use crate::observations::StationId;
    use crate::smoothing::SmoothingMethod;
    use crate::split::{ChunkLayout, SplitPolicy};

    const PURPLE_AIR_YAML: &str = r#"
data_source: purple_air
observations:
  table_name: purple_air_pm25
  columns:
    station: sensor_index
  request_condition: "WHERE date_observed >= '2019-01-01'"
cleaning:
  remove_stations: [16, "Reseda"]
smoothing:
  method: median
split:
  rule: chunked
output:
  dataset_dir: /data/pm25
"#;

    #[test]
    fn test_yaml_defaults_follow_data_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("purple_air.yaml");
        fs::write(&path, PURPLE_AIR_YAML).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.data_source, DataSource::PurpleAir);
        assert_eq!(config.observations.columns.station, "sensor_index");
        assert_eq!(config.observations.columns.value, "value");
        assert_eq!(
            config.cleaning.remove_stations,
            vec![StationId::new("16"), StationId::new("Reseda")]
        );
        assert!(config.cleaning.reconcile_for(config.data_source));
        assert!(config.smoothing.enabled_for(config.data_source));
        assert_eq!(config.smoothing.method, SmoothingMethod::Median);
        assert_eq!(config.smoothing.window_size, 24);
        assert_eq!(config.windows.input_size, 6);
        assert_eq!(
            config.split.policy().unwrap(),
            SplitPolicy::Chunked(ChunkLayout::new(441, 63, 168))
        );
        assert_eq!(
            config.output.run_config_path(),
            PathBuf::from("/data/pm25/run_config.yaml")
        );
    }

    #[test]
    fn test_json_epa_with_proportional_split() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("epa.json");
        fs::write(
            &path,
            r#"{
                "data_source": "epa",
                "observations": {"table_name": "epa_pm25"},
                "windows": {"input_size": 12, "output_size": 3},
                "split": {"rule": "proportional", "train_fraction": 0.6},
                "output": {"dataset_dir": "out", "run_config_file": "runs/epa.yaml"}
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert!(!config.cleaning.reconcile_for(DataSource::Epa));
        assert!(!config.smoothing.enabled_for(DataSource::Epa));
        assert_eq!(config.windows.output_size, 3);
        match &config.split {
            SplitConfig::Proportional(p) => {
                assert_eq!(p.train_fraction, 0.6);
                assert_eq!(p.test_fraction, 0.2);
            }
            other => panic!("unexpected split {:?}", other),
        }
        assert_eq!(config.output.run_config_path(), PathBuf::from("runs/epa.yaml"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(
            &path,
            "data_source: epa\nobservations: {table_name: t}\nwindow: {input_size: 3}\noutput: {dataset_dir: out}\n",
        )
        .unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.yaml");
        fs::write(
            &path,
            "data_source: epa\nobservations: {table_name: t}\nwindows: {input_size: 0}\noutput: {dataset_dir: out}\n",
        )
        .unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Invalid { ref field, .. }) if field == "windows.input_size"
        ));

        let path = dir.path().join("overfull.yaml");
        fs::write(
            &path,
            "data_source: epa\nobservations: {table_name: t}\nsplit: {rule: chunked, chunk_weeks: 2, train_weeks: 2, train_keep_fraction: 1.0}\noutput: {dataset_dir: out}\n",
        )
        .unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_config(&dir.path().join("absent.yaml")),
            Err(ConfigError::NotFound { .. })
        ));

        let path = dir.path().join("config.toml");
        fs::write(&path, "data_source = 'epa'").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }
}
