#[cfg(test)]
mod cleaning_tests {
    use approx::assert_relative_eq;

    use crate::duplicates::{correlation_by_station, CorrelationScore, DuplicateReconciler};
    use crate::errors::FitError;
    use crate::observations::{ObservationTable, StationId};
    use crate::pipeline::PreparationPipeline;
    use crate::tests::test_helpers::test_helpers::*;
    use crate::time_series::build_time_series;

    #[test]
    fn test_dedup_and_positive_filter_before_build() {
        let mut table = ObservationTable::load(vec![
            obs("A", 0, 5.0),
            obs("A", 0, 5.0),
            obs("A", 1, -3.0),
            obs("B", 0, 7.0),
        ]);
        let dedup = table.deduplicate();
        let positive = table.filter_positive();
        assert_eq!(dedup.rows_removed, 1);
        assert_eq!(positive.rows_removed, 1);

        let matrix = build_time_series(&table).unwrap();
        assert_eq!(matrix.n_rows(), 1);
        assert_eq!(matrix.stations(), [StationId::new("A"), StationId::new("B")]);
        assert_eq!(matrix.get(0, 0), Some(5.0));
        assert_eq!(matrix.get(0, 1), Some(7.0));
    }

    #[test]
    fn test_filter_positive_drops_zero_and_nan() {
        let mut table = ObservationTable::load(vec![
            obs("A", 0, 0.0),
            obs("A", 1, f64::NAN),
            obs("A", 2, 0.5),
        ]);
        table.filter_positive();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].value, 0.5);
    }

    #[test]
    fn test_filter_reports_emptied_station() {
        let mut table = ObservationTable::load(vec![obs("A", 0, -1.0), obs("B", 0, 2.0)]);
        let report = table.filter_positive();
        assert_eq!(report.emptied_stations, vec![StationId::new("A")]);
    }

    fn duplicated_table() -> ObservationTable {
        ObservationTable::load(vec![
            // A: channels agree
            obs("A", 0, 1.0),
            obs("A", 0, 1.2),
            obs("A", 1, 2.0),
            obs("A", 1, 2.1),
            obs("A", 2, 3.0),
            obs("A", 2, 3.3),
            // B: channels disagree
            obs("B", 0, 1.0),
            obs("B", 0, 9.0),
            obs("B", 1, 5.0),
            obs("B", 1, 6.0),
            obs("B", 2, 8.0),
            obs("B", 2, 2.0),
            // C: no duplicates
            obs("C", 0, 4.0),
            obs("C", 1, 4.5),
            // D: a single duplicated slot
            obs("D", 0, 2.0),
            obs("D", 0, 2.5),
            obs("D", 1, 3.0),
        ])
    }

    #[test]
    fn test_correlation_scores() {
        let table = duplicated_table();
        let scores = correlation_by_station(&table, &table.distinct_stations());

        let a = scores[&StationId::new("A")].value().unwrap();
        assert!(a > 0.99);
        let b = scores[&StationId::new("B")].value().unwrap();
        assert!(b < 0.0);
        assert_eq!(scores[&StationId::new("C")], CorrelationScore::NoDuplicates);
        assert_eq!(
            scores[&StationId::new("D")],
            CorrelationScore::InsufficientGroups(1)
        );
    }

    #[test]
    fn test_correlation_degenerate_channel() {
        let table = ObservationTable::load(vec![
            obs("E", 0, 1.0),
            obs("E", 0, 2.0),
            obs("E", 1, 1.0),
            obs("E", 1, 5.0),
        ]);
        let scores = correlation_by_station(&table, &table.distinct_stations());
        assert_eq!(
            scores[&StationId::new("E")],
            CorrelationScore::Degenerate(FitError::ZeroVariance)
        );
    }

    #[test]
    fn test_reconcile_drops_disagreeing_and_averages_the_rest() {
        let outcome = DuplicateReconciler::new(0.8).reconcile(&duplicated_table());

        assert_eq!(
            outcome.kept_stations,
            vec![StationId::new("A"), StationId::new("C"), StationId::new("D")]
        );
        assert_eq!(outcome.flagged.len(), 1);
        assert_eq!(outcome.flagged[0].0, StationId::new("B"));
        assert_eq!(outcome.undetermined.len(), 1);

        // one row per (station, hour)
        let matrix = build_time_series(&outcome.table).unwrap();
        assert_relative_eq!(matrix.get(0, 0).unwrap(), 1.1, epsilon = 1e-12);
        assert_relative_eq!(matrix.get(2, 0).unwrap(), 3.15, epsilon = 1e-12);
        assert_relative_eq!(matrix.get(0, 2).unwrap(), 2.25, epsilon = 1e-12);
        assert!(outcome.table.rows().iter().all(|r| r.station_id.as_str() != "B"));
    }

    #[test]
    fn test_reconcile_can_drop_undetermined() {
        let outcome = DuplicateReconciler::new(0.8)
            .drop_undetermined(true)
            .reconcile(&duplicated_table());
        assert_eq!(
            outcome.kept_stations,
            vec![StationId::new("A"), StationId::new("C")]
        );
    }

    #[test]
    fn test_build_rejects_unreconciled_duplicates() {
        let err = build_time_series(&duplicated_table()).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::PipelineError::UnreconciledDuplicate { .. }
        ));
    }

    #[test]
    fn test_pipeline_clean_follows_data_source() {
        let purple_air = PreparationPipeline::new(config_yaml(
            "data_source: purple_air\n\
             observations: {table_name: pa}\n\
             cleaning: {remove_stations: [C]}\n\
             output: {dataset_dir: out}\n",
        ))
        .unwrap();
        let (table, summary) = purple_air.clean(duplicated_table());
        assert!(summary.reconciled);
        assert_eq!(summary.removed.rows_removed, 2);
        assert_eq!(summary.flagged[0].0, StationId::new("B"));
        assert_eq!(
            table.distinct_stations(),
            vec![StationId::new("A"), StationId::new("D")]
        );

        let epa = PreparationPipeline::new(config_yaml(
            "data_source: epa\n\
             observations: {table_name: epa}\n\
             output: {dataset_dir: out}\n",
        ))
        .unwrap();
        let (table, summary) = epa.clean(duplicated_table());
        assert!(!summary.reconciled);
        assert_eq!(table.len(), duplicated_table().len());
    }
}
