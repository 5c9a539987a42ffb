#![allow(clippy::cast_precision_loss, clippy::unreadable_literal)]
use showerlut_algorithms::{blend, index_boundary, LookupEngine, Prediction, TableFiller};
use showerlut_core::{
    Axis, LookupConfig, ObservedEvent, Quantity, QuantityConfig, ReferenceEvent,
    SimulationConditions, TelescopeImage, ValueScale,
};

#[test]
fn test_bracket_search_is_monotonic_and_clamped() {
    let mut seed: u64 = 12345;
    let mut rand = || {
        seed = (seed.wrapping_mul(1103515245).wrapping_add(12345)) & 0x7fffffff;
        seed as f64 / 2_147_483_648.0
    };

    let axes: [&[f64]; 4] = [
        &[0.5],
        &[1.0, 2.0],
        &[0.0, 20.0, 30.0, 40.0, 50.0],
        &[1.5, 2.0, 3.25, 4.0, 6.5, 8.0],
    ];
    for axis in axes {
        let (first, last) = (axis[0], axis[axis.len() - 1]);
        for _ in 0..500 {
            let x = first - 2.0 + (last - first + 4.0) * rand();
            let (low, up) = index_boundary(axis, x).unwrap();
            assert!(low <= up, "{x}: {low} > {up}");
            assert!(up < axis.len());
            if x <= first {
                assert_eq!((low, up), (0, 0));
            } else if x >= last {
                assert_eq!((low, up), (axis.len() - 1, axis.len() - 1));
            } else {
                assert!(axis[low] <= x && x <= axis[up]);
                assert!(up - low <= 1);
            }
        }
        for (i, &value) in axis.iter().enumerate() {
            assert_eq!(index_boundary(axis, value), Some((i, i)));
        }
    }
}

#[test]
fn test_blend_of_equal_corners_is_exact() {
    let p = Prediction::new(0.731_2, 0.065_4);
    for i in 0..=100 {
        let w = f64::from(i) / 100.0;
        assert_eq!(blend(Some(p), Some(p), w).unwrap(), p);
    }
}

fn telescope(distance: f64, width: f64) -> TelescopeImage {
    TelescopeImage {
        telescope_type: 3,
        noise: 2.0,
        impact_distance_m: distance,
        amplitude: 1000.0,
        loss: 0.0,
        camera_distance_deg: None,
        width,
        length: 0.2,
    }
}

#[test]
fn test_identical_offset_tables_interpolate_to_same_value() {
    let config = LookupConfig::default()
        .with_min_entries_per_bin(1)
        .with_quantity(
            Quantity::Width,
            QuantityConfig {
                log_amplitude: Axis::new(2.0, 4.0, 2),
                distance: Axis::new(0.0, 300.0, 6),
                scale: ValueScale::Linear { min: 0.0, max: 1.0 },
                value_bins: 100,
            },
        );
    let events: Vec<ReferenceEvent> = (0..300)
        .map(|i| ReferenceEvent {
            event_id: i,
            zenith_deg: 20.0,
            azimuth_deg: 0.0,
            offset_deg: 0.0,
            noise: 2.0,
            core_distance_m: None,
            true_energy_tev: 0.5 + (i % 7) as f64,
            weight: 1.0,
            telescopes: vec![telescope(i as f64, 0.05 + 0.001 * i as f64)],
        })
        .collect();

    let fill = |offset| {
        let mut filler =
            TableFiller::new(&config, SimulationConditions::new(20.0, 2.0, offset)).unwrap();
        filler.fill_batch(&events);
        filler.finish().unwrap().0
    };
    let mut tables = fill(0.5);
    tables.merge(fill(1.0)).unwrap();
    let engine = LookupEngine::new(&tables, &config).unwrap();

    let predict = |offset_deg| {
        let event = ObservedEvent {
            event_id: 0,
            zenith_deg: 20.0,
            azimuth_deg: 0.0,
            offset_deg,
            telescopes: vec![telescope(120.0, 0.2)],
        };
        engine.evaluate(&event).telescopes[0].predictions
    };
    let corner = predict(0.5);
    assert!(corner.width.is_some());
    assert!(corner.energy.is_some());
    for offset in [0.55, 0.7, 0.75, 0.99] {
        assert_eq!(predict(offset), corner);
    }
}
