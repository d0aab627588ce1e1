use ballotgate::config::BiometricConfig;
use ballotgate::flow::{Progress, StepError, VotingSession};
use ballotgate::session::Step;
use ballotgate::signal::{EyePoints, Point};
use ballotgate::store::{
    AuditKind, Election, ElectionOption, ElectionStore, JsonFileStore, ProfileStore, VoteStore,
};
use ballotgate::vision::{
    BoundingBox, CameraSlot, CancelToken, Detection, FaceLandmarks, ReplayDetector, SharedDetector,
    SyntheticCamera,
};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

const DIM: usize = 4;

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("ballotgate-e2e-{tag}-{nanos}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Eye 30 units wide whose EAR is `ear`.
fn eye(ear: f32) -> EyePoints {
    let h = ear * 15.0;
    [
        Point::new(0.0, 0.0),
        Point::new(10.0, -h),
        Point::new(20.0, -h),
        Point::new(30.0, 0.0),
        Point::new(20.0, h),
        Point::new(10.0, h),
    ]
}

fn face(ear: f32, embedding: Option<Vec<f32>>) -> Option<Detection> {
    Some(Detection {
        bbox: BoundingBox::default(),
        landmarks: FaceLandmarks {
            left_eye: eye(ear),
            right_eye: eye(ear),
        },
        embedding,
    })
}

fn blinks() -> Vec<Option<Detection>> {
    let mut entries = vec![face(0.35, None)];
    for _ in 0..3 {
        entries.push(face(0.1, None));
        entries.push(face(0.35, None));
    }
    entries
}

fn config() -> BiometricConfig {
    BiometricConfig {
        poll_interval_ms: 2,
        embedding_dim: DIM,
        blink_close_debounce_ms: 0,
        blink_open_debounce_ms: 0,
        blink_settle_ms: 0,
        ..BiometricConfig::default()
    }
}

fn referendum() -> Election {
    Election {
        id: "referendum".to_string(),
        title: "City referendum".to_string(),
        options: vec![
            ElectionOption {
                id: "yes".to_string(),
                label: "Yes".to_string(),
            },
            ElectionOption {
                id: "no".to_string(),
                label: "No".to_string(),
            },
        ],
        start_ms: 0,
        end_ms: u64::MAX,
    }
}

#[test]
fn enroll_verify_blink_vote_and_reject_second_ballot() {
    let dir = scratch_dir("flow");
    let store_path = dir.join("store.json");
    let store = Arc::new(JsonFileStore::open(&store_path).unwrap());
    store.upsert_election(referendum()).unwrap();

    let mut entries = vec![
        face(0.3, Some(vec![0.1, 0.5, 0.5, 0.5])),
        face(0.3, Some(vec![0.3, 0.5, 0.5, 0.5])),
        face(0.3, Some(vec![0.2, 0.5, 0.5, 0.5])),
        face(0.3, Some(vec![0.2, 0.5, 0.5, 0.6])),
    ];
    entries.extend(blinks());
    entries.push(face(0.3, Some(vec![0.2, 0.5, 0.5, 0.5])));
    entries.extend(blinks());
    let detector: SharedDetector = Arc::new(Mutex::new(Box::new(
        ReplayDetector::from_detections(entries),
    )));
    let camera = CameraSlot::new(SyntheticCamera::new());
    let mut session = VotingSession::new(camera.clone(), detector, store.clone(), config());
    let cancel = CancelToken::new();
    let mut ignore = |_: Progress| {};

    assert_eq!(session.authenticate("alice").unwrap().step, Step::Enroll);
    assert_eq!(session.enroll(&cancel, &mut ignore).unwrap().step, Step::Verify);
    assert_eq!(session.verify(&cancel, &mut ignore).unwrap().step, Step::Liveness);
    assert_eq!(
        session.check_liveness(&cancel, &mut ignore).unwrap().step,
        Step::Vote
    );
    assert_eq!(
        session.cast_vote("referendum", "yes").unwrap().step,
        Step::Done
    );
    assert!(!camera.is_held());

    assert_eq!(session.vote_again().unwrap().step, Step::Verify);
    session.verify(&cancel, &mut ignore).unwrap();
    session.check_liveness(&cancel, &mut ignore).unwrap();
    let err = session.cast_vote("referendum", "no").unwrap_err();
    assert_eq!(
        err,
        StepError::AlreadyVoted {
            election_id: "referendum".to_string()
        }
    );
    assert_eq!(session.step(), Step::Vote);
    drop(session);
    drop(store);

    let reopened = JsonFileStore::open(&store_path).unwrap();
    let votes = reopened.votes_for_voter("alice").unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].option_id, "yes");
    assert!(votes[0].face_verified && votes[0].blink_verified);

    let profile = reopened.get_profile("alice").unwrap().unwrap();
    let template = profile.reference().unwrap();
    assert!((template[0] - 0.2).abs() < 1e-6);
    let image = PathBuf::from(profile.image_ref.unwrap());
    assert!(image.starts_with(dir.join("store_images")));
    assert!(image.exists());

    let kinds: Vec<AuditKind> = reopened.audit_events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::EnrollSuccess,
            AuditKind::VerifySuccess,
            AuditKind::LivenessSuccess,
            AuditKind::VoteCast,
            AuditKind::VerifySuccess,
            AuditKind::LivenessSuccess,
        ]
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn returning_voter_skips_enrollment() {
    let dir = scratch_dir("return");
    let store = Arc::new(JsonFileStore::open(dir.join("store.json")).unwrap());
    let enroll_entries = vec![
        face(0.3, Some(vec![0.4; DIM])),
        face(0.3, Some(vec![0.4; DIM])),
        face(0.3, Some(vec![0.4; DIM])),
    ];
    let mut first = VotingSession::new(
        CameraSlot::new(SyntheticCamera::new()),
        Arc::new(Mutex::new(Box::new(ReplayDetector::from_detections(
            enroll_entries,
        )))),
        store.clone(),
        config(),
    );
    first.authenticate("bob").unwrap();
    first.enroll(&CancelToken::new(), &mut |_: Progress| {}).unwrap();
    first.sign_out().unwrap();

    let mut second = VotingSession::new(
        CameraSlot::new(SyntheticCamera::new()),
        Arc::new(Mutex::new(Box::new(ReplayDetector::from_detections([])))),
        store,
        config(),
    );
    assert_eq!(second.authenticate("bob").unwrap().step, Step::Verify);
    let _ = fs::remove_dir_all(dir);
}
