//! End-to-end runs over the in-memory archive: mapping shape, channel
//! isolation, and state resets across gaps and skipped segments.

use excavator::testing::{MemoryArchive, TriggerList};
use excavator::{
    Abs, RunController, RunParams, Segment, TransformChain, Transformation, Trigger,
};
use ndarray::{Array1, ArrayView1};

fn archive(names: &[&str]) -> MemoryArchive {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut archive = MemoryArchive::new(50.0);
    for name in names {
        archive.add_channel(*name);
    }
    archive
}

/// Emits 1.0 for the first segment after construction or a reset and 2.0
/// for every segment after that, making state resets visible in the
/// histogram kind: a run where every segment saw fresh state accumulates a
/// constant histogram.
struct FreshnessProbe {
    fresh: bool,
}

impl FreshnessProbe {
    fn chain() -> TransformChain {
        TransformChain::new(vec![Box::new(FreshnessProbe { fresh: true })])
    }
}

impl Transformation for FreshnessProbe {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let v = if self.fresh { 1.0 } else { 2.0 };
        self.fresh = false;
        Array1::from_elem(x.len(), v)
    }

    fn reset(&mut self) {
        self.fresh = true;
    }
}

#[test]
fn mapping_covers_channels_transforms_and_labels() {
    let archive = archive(&["V1:Sc_IB_MIR_z", "V1:INJ_laser_power"]);
    let triggers = TriggerList::new(vec![
        Trigger::new(1001.0, "scattered_light"),
        Trigger::new(1012.0, "koi_fish"),
    ]);
    let params = RunParams::default().with_chains(vec![
        Box::new(TransformChain::raw),
        Box::new(|| TransformChain::new(vec![Box::new(Abs)])),
    ]);
    let controller = RunController::new(&archive, &triggers, params);
    let segments = vec![Segment::new(1000.0, 1010.0), Segment::new(1010.0, 1020.0)];
    let out = controller.run(&segments).unwrap();

    // 2 channels x 2 transforms x (1 aux + 2 labels)
    assert_eq!(out.histograms.len(), 12);
    assert_eq!(
        out.histograms.channels(),
        vec!["V1:INJ_laser_power", "V1:Sc_IB_MIR_z"]
    );
    for channel in ["V1:Sc_IB_MIR_z", "V1:INJ_laser_power"] {
        for transform in ["", "abs"] {
            assert!(out.histograms.get_aux(channel, transform).is_some());
            for label in ["scattered_light", "koi_fish"] {
                assert!(out.histograms.get_trigger(channel, transform, label).is_some());
            }
        }
    }
}

#[test]
fn failing_channel_leaves_the_others_untouched() {
    let names = ["V1:Sc_IB_MIR_z", "V1:INJ_laser_power", "V1:Bs_payload_x"];
    let triggers = || {
        TriggerList::new(vec![
            Trigger::new(1001.0, "scattered_light"),
            Trigger::new(1012.0, "scattered_light"),
        ])
    };
    let segments = vec![Segment::new(1000.0, 1010.0), Segment::new(1010.0, 1020.0)];

    let mut flaky = archive(&names);
    flaky.fail_from("V1:INJ_laser_power", 1010.0);
    let trig = triggers();
    let controller = RunController::new(&flaky, &trig, RunParams::default());
    let with_failure = controller.run(&segments).unwrap();

    let healthy = archive(&["V1:Sc_IB_MIR_z", "V1:Bs_payload_x"]);
    let trig = triggers();
    let controller = RunController::new(&healthy, &trig, RunParams::default());
    let reference = controller.run(&segments).unwrap();

    assert_eq!(with_failure.summary.channels_discarded, 1);
    assert_eq!(with_failure.summary.channels_survived, 2);
    assert!(with_failure.histograms.get_aux("V1:INJ_laser_power", "").is_none());

    for channel in ["V1:Sc_IB_MIR_z", "V1:Bs_payload_x"] {
        let got = with_failure.histograms.get_aux(channel, "").unwrap();
        let want = reference.histograms.get_aux(channel, "").unwrap();
        assert_eq!(got, want);
        let got = with_failure
            .histograms
            .get_trigger(channel, "", "scattered_light")
            .unwrap();
        let want = reference
            .histograms
            .get_trigger(channel, "", "scattered_light")
            .unwrap();
        assert_eq!(got, want);
    }
}

#[test]
fn contiguous_segments_share_transformation_state() {
    let archive = archive(&["V1:Sc_IB_MIR_z"]);
    let triggers = TriggerList::new(vec![
        Trigger::new(1001.0, "scattered_light"),
        Trigger::new(1012.0, "scattered_light"),
    ]);
    let params = RunParams::default()
        .with_threads(1)
        .with_chains(vec![Box::new(FreshnessProbe::chain)]);
    let controller = RunController::new(&archive, &triggers, params);
    let segments = vec![Segment::new(1000.0, 1010.0), Segment::new(1010.0, 1020.0)];
    let out = controller.run(&segments).unwrap();

    // second segment saw carried-over state, so two distinct values landed
    let aux = out.histograms.get_aux("V1:Sc_IB_MIR_z", "probe").unwrap();
    assert_eq!(aux.total_count(), 1000);
    assert!(aux.is_expanded());
}

#[test]
fn gap_resets_transformation_state() {
    let archive = archive(&["V1:Sc_IB_MIR_z"]);
    let triggers = TriggerList::new(vec![
        Trigger::new(1001.0, "scattered_light"),
        Trigger::new(1016.0, "scattered_light"),
    ]);
    let params = RunParams::default()
        .with_threads(1)
        .with_chains(vec![Box::new(FreshnessProbe::chain)]);
    let controller = RunController::new(&archive, &triggers, params);
    let segments = vec![Segment::new(1000.0, 1010.0), Segment::new(1015.0, 1025.0)];
    let out = controller.run(&segments).unwrap();

    // both segments saw fresh state, so only one value ever landed
    let aux = out.histograms.get_aux("V1:Sc_IB_MIR_z", "probe").unwrap();
    assert_eq!(aux.total_count(), 1000);
    assert!(aux.is_constant());
}

#[test]
fn skipped_segment_resets_transformation_state() {
    let archive = archive(&["V1:Sc_IB_MIR_z"]);
    // the middle segment has no triggers and is skipped
    let triggers = TriggerList::new(vec![
        Trigger::new(1001.0, "scattered_light"),
        Trigger::new(1022.0, "scattered_light"),
    ]);
    let params = RunParams::default()
        .with_threads(1)
        .with_chains(vec![Box::new(FreshnessProbe::chain)]);
    let controller = RunController::new(&archive, &triggers, params);
    let segments = vec![
        Segment::new(1000.0, 1010.0),
        Segment::new(1010.0, 1020.0),
        Segment::new(1020.0, 1030.0),
    ];
    let out = controller.run(&segments).unwrap();

    assert_eq!(out.summary.segments_processed, 2);
    assert_eq!(out.summary.segments_skipped, 1);
    // the skip broke continuity, so the third segment saw fresh state too
    let aux = out.histograms.get_aux("V1:Sc_IB_MIR_z", "probe").unwrap();
    assert_eq!(aux.total_count(), 1000);
    assert!(aux.is_constant());
}
