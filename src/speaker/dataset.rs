//! Training clip manifests and train/val/test splitting
//!
//! Splits default to session granularity: whole sessions are assigned to one
//! split so the classifier is never evaluated on audio from a recording it
//! trained on. Two repair passes keep the assignment usable when a speaker's
//! sessions all land in one split.

use crate::error::SpeakerError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One labeled training clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRecord {
    pub speaker: String,
    pub session_id: String,
    pub clip_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Load a clip manifest: a JSON array of ClipRecord
pub fn load_manifest(path: &Path) -> Result<Vec<ClipRecord>, SpeakerError> {
    if !path.exists() {
        return Err(SpeakerError::ManifestMissing(path.to_path_buf()));
    }
    let data = std::fs::read_to_string(path)?;
    let clips: Vec<ClipRecord> = serde_json::from_str(&data)?;
    Ok(clips)
}

/// Drop under-represented speakers; optionally cap clips per speaker after
/// a seeded shuffle so the cap removes a deterministic random subset.
pub fn filter_clips(
    clips: Vec<ClipRecord>,
    min_clips_per_speaker: usize,
    max_clips_per_speaker: Option<usize>,
    seed: u64,
) -> Result<Vec<ClipRecord>, SpeakerError> {
    let mut by_speaker: BTreeMap<String, Vec<ClipRecord>> = BTreeMap::new();
    for clip in clips {
        by_speaker.entry(clip.speaker.clone()).or_default().push(clip);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut kept = Vec::new();
    for (speaker, mut speaker_clips) in by_speaker {
        if speaker_clips.len() < min_clips_per_speaker {
            warn!(
                "Dropping speaker '{}': {} clip(s), need {}",
                speaker,
                speaker_clips.len(),
                min_clips_per_speaker
            );
            continue;
        }
        if let Some(cap) = max_clips_per_speaker {
            if speaker_clips.len() > cap {
                speaker_clips.shuffle(&mut rng);
                speaker_clips.truncate(cap);
            }
        }
        kept.extend(speaker_clips);
    }

    if kept.is_empty() {
        return Err(SpeakerError::EmptyDataset);
    }
    Ok(kept)
}

/// A finished split with its session-to-split assignment
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<ClipRecord>,
    pub val: Vec<ClipRecord>,
    pub test: Vec<ClipRecord>,
    /// session_id -> "train" | "val" | "test" (session mode only)
    pub session_assignment: HashMap<String, String>,
}

/// Session-disjoint split: shuffle sessions, carve off test then val, then
/// repair speaker coverage.
pub fn session_disjoint_split(
    clips: &[ClipRecord],
    test_size: f64,
    val_size: f64,
    seed: u64,
) -> Result<DatasetSplit, SpeakerError> {
    // BTreeSet gives a stable pre-shuffle order regardless of clip order
    let sessions: Vec<String> = clips
        .iter()
        .map(|c| c.session_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let n = sessions.len();
    if n == 0 {
        return Err(SpeakerError::EmptyDataset);
    }

    let mut shuffled = sessions;
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let n_test = ((n as f64 * test_size).round() as usize).clamp(1, n.saturating_sub(1).max(1));
    let n_val = ((n as f64 * val_size).round() as usize).min(n.saturating_sub(n_test + 1));

    let mut assignment: HashMap<String, String> = HashMap::new();
    for (i, session) in shuffled.iter().enumerate() {
        let split = if i < n_test {
            "test"
        } else if i < n_test + n_val {
            "val"
        } else {
            "train"
        };
        assignment.insert(session.clone(), split.to_string());
    }

    // Speaker -> their sessions, in stable order
    let mut speaker_sessions: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for clip in clips {
        let entry = speaker_sessions.entry(&clip.speaker).or_default();
        if !entry.contains(&clip.session_id.as_str()) {
            entry.push(&clip.session_id);
        }
    }
    for sessions in speaker_sessions.values_mut() {
        sessions.sort_unstable();
    }

    // Repair 1: every speaker must have at least one session in train
    for (speaker, sessions) in &speaker_sessions {
        let in_train = sessions
            .iter()
            .any(|s| assignment.get(*s).map(String::as_str) == Some("train"));
        if !in_train {
            if let Some(first) = sessions.first() {
                debug!("Repair: moving session '{}' to train for speaker '{}'", first, speaker);
                assignment.insert((*first).to_string(), "train".to_string());
            }
        }
    }

    // Repair 2: speakers with two or more sessions should appear in test
    for (speaker, sessions) in &speaker_sessions {
        if sessions.len() < 2 {
            continue;
        }
        let in_test = sessions
            .iter()
            .any(|s| assignment.get(*s).map(String::as_str) == Some("test"));
        if in_test {
            continue;
        }
        let promote = sessions
            .iter()
            .find(|s| assignment.get(**s).map(String::as_str) == Some("val"))
            .or(sessions.last());
        if let Some(session) = promote {
            debug!("Repair: promoting session '{}' to test for speaker '{}'", session, speaker);
            assignment.insert((*session).to_string(), "test".to_string());
        }
    }

    let mut split = DatasetSplit {
        train: Vec::new(),
        val: Vec::new(),
        test: Vec::new(),
        session_assignment: assignment,
    };
    for clip in clips {
        match split
            .session_assignment
            .get(&clip.session_id)
            .map(String::as_str)
        {
            Some("test") => split.test.push(clip.clone()),
            Some("val") => split.val.push(clip.clone()),
            _ => split.train.push(clip.clone()),
        }
    }

    if split.train.is_empty() {
        return Err(SpeakerError::EmptySplit("train"));
    }
    if split.test.is_empty() {
        return Err(SpeakerError::EmptySplit("test"));
    }

    info!(
        "Session split: {} train / {} val / {} test clips over {} sessions",
        split.train.len(),
        split.val.len(),
        split.test.len(),
        split.session_assignment.len()
    );
    Ok(split)
}

/// Stratified clip-level split: per-speaker shuffle, then carve test and val
/// fractions out of each speaker's clips.
pub fn stratified_clip_split(
    clips: &[ClipRecord],
    test_size: f64,
    val_size: f64,
    seed: u64,
) -> Result<DatasetSplit, SpeakerError> {
    let mut by_speaker: BTreeMap<String, Vec<ClipRecord>> = BTreeMap::new();
    for clip in clips {
        by_speaker
            .entry(clip.speaker.clone())
            .or_default()
            .push(clip.clone());
    }
    if by_speaker.is_empty() {
        return Err(SpeakerError::EmptyDataset);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = DatasetSplit {
        train: Vec::new(),
        val: Vec::new(),
        test: Vec::new(),
        session_assignment: HashMap::new(),
    };

    for (_, mut speaker_clips) in by_speaker {
        speaker_clips.shuffle(&mut rng);
        let n = speaker_clips.len();
        let n_test = ((n as f64 * test_size).round() as usize).min(n.saturating_sub(1));
        let n_val = ((n as f64 * val_size).round() as usize).min(n.saturating_sub(n_test + 1));

        for (i, clip) in speaker_clips.into_iter().enumerate() {
            if i < n_test {
                split.test.push(clip);
            } else if i < n_test + n_val {
                split.val.push(clip);
            } else {
                split.train.push(clip);
            }
        }
    }

    if split.train.is_empty() {
        return Err(SpeakerError::EmptySplit("train"));
    }
    if split.test.is_empty() {
        return Err(SpeakerError::EmptySplit("test"));
    }
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(speaker: &str, session: &str, i: usize) -> ClipRecord {
        ClipRecord {
            speaker: speaker.to_string(),
            session_id: session.to_string(),
            clip_path: PathBuf::from(format!("/clips/{}_{}_{}.wav", speaker, session, i)),
            duration: Some(5.0),
        }
    }

    fn corpus() -> Vec<ClipRecord> {
        let mut clips = Vec::new();
        // 3 speakers, 6 sessions, several clips each
        for (speaker, sessions) in [
            ("alice", vec!["s1", "s2", "s3"]),
            ("bob", vec!["s2", "s4", "s5"]),
            ("carol", vec!["s5", "s6"]),
        ] {
            for session in sessions {
                for i in 0..4 {
                    clips.push(clip(speaker, session, i));
                }
            }
        }
        clips
    }

    #[test]
    fn test_filter_drops_rare_speakers() {
        let mut clips = corpus();
        clips.push(clip("dave", "s7", 0));
        let kept = filter_clips(clips, 3, None, 42).unwrap();
        assert!(kept.iter().all(|c| c.speaker != "dave"));
        assert!(kept.iter().any(|c| c.speaker == "alice"));
    }

    #[test]
    fn test_filter_cap_is_deterministic() {
        let a = filter_clips(corpus(), 1, Some(5), 42).unwrap();
        let b = filter_clips(corpus(), 1, Some(5), 42).unwrap();
        let paths_a: Vec<_> = a.iter().map(|c| c.clip_path.clone()).collect();
        let paths_b: Vec<_> = b.iter().map(|c| c.clip_path.clone()).collect();
        assert_eq!(paths_a, paths_b);
        assert!(a.iter().filter(|c| c.speaker == "alice").count() <= 5);
    }

    #[test]
    fn test_filter_empty_dataset() {
        assert!(matches!(
            filter_clips(corpus(), 100, None, 42),
            Err(SpeakerError::EmptyDataset)
        ));
    }

    #[test]
    fn test_sessions_are_disjoint() {
        let split = session_disjoint_split(&corpus(), 0.3, 0.15, 42).unwrap();
        let train: BTreeSet<_> = split.train.iter().map(|c| &c.session_id).collect();
        let val: BTreeSet<_> = split.val.iter().map(|c| &c.session_id).collect();
        let test: BTreeSet<_> = split.test.iter().map(|c| &c.session_id).collect();
        assert!(train.is_disjoint(&val));
        assert!(train.is_disjoint(&test));
        assert!(val.is_disjoint(&test));
    }

    /// Sessions owned by exactly one speaker, so the repair guarantees hold
    fn disjoint_corpus() -> Vec<ClipRecord> {
        let mut clips = Vec::new();
        for (speaker, sessions) in [
            ("alice", vec!["a1", "a2", "a3"]),
            ("bob", vec!["b1", "b2", "b3"]),
            ("carol", vec!["c1", "c2"]),
        ] {
            for session in sessions {
                for i in 0..4 {
                    clips.push(clip(speaker, session, i));
                }
            }
        }
        clips
    }

    #[test]
    fn test_every_speaker_reaches_train() {
        for seed in [1u64, 7, 42, 1234] {
            let split = session_disjoint_split(&disjoint_corpus(), 0.3, 0.15, seed).unwrap();
            for speaker in ["alice", "bob", "carol"] {
                assert!(
                    split.train.iter().any(|c| c.speaker == speaker),
                    "speaker {} missing from train with seed {}",
                    speaker,
                    seed
                );
            }
        }
    }

    #[test]
    fn test_multi_session_speakers_reach_test() {
        for seed in [1u64, 7, 42, 1234] {
            let split = session_disjoint_split(&disjoint_corpus(), 0.3, 0.15, seed).unwrap();
            for speaker in ["alice", "bob", "carol"] {
                assert!(
                    split.test.iter().any(|c| c.speaker == speaker),
                    "speaker {} missing from test with seed {}",
                    speaker,
                    seed
                );
            }
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = session_disjoint_split(&corpus(), 0.3, 0.15, 42).unwrap();
        let b = session_disjoint_split(&corpus(), 0.3, 0.15, 42).unwrap();
        assert_eq!(a.session_assignment, b.session_assignment);
    }

    #[test]
    fn test_two_sessions_still_split() {
        let clips = vec![
            clip("alice", "s1", 0),
            clip("alice", "s1", 1),
            clip("alice", "s2", 0),
            clip("alice", "s2", 1),
        ];
        let split = session_disjoint_split(&clips, 0.5, 0.0, 42).unwrap();
        assert!(!split.train.is_empty());
        assert!(!split.test.is_empty());
    }

    #[test]
    fn test_stratified_clip_split_keeps_fractions() {
        let split = stratified_clip_split(&corpus(), 0.25, 0.0, 42).unwrap();
        // alice has 12 clips: 3 should land in test
        let alice_test = split.test.iter().filter(|c| c.speaker == "alice").count();
        assert_eq!(alice_test, 3);
        let alice_train = split.train.iter().filter(|c| c.speaker == "alice").count();
        assert_eq!(alice_train, 9);
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.json");
        std::fs::write(
            &path,
            r#"[{"speaker": "alice", "session_id": "s1", "clip_path": "/clips/a.wav", "duration": 4.5}]"#,
        )
        .unwrap();
        let clips = load_manifest(&path).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].speaker, "alice");

        assert!(matches!(
            load_manifest(&dir.path().join("missing.json")),
            Err(SpeakerError::ManifestMissing(_))
        ));
    }
}
