//! Multi-face response → display-ready result set.

use chrono::{DateTime, Utc};
use facelink_types::{RecognitionResponse, RecognitionResult};

/// Convert a recognition response into one [`RecognitionResult`] per face,
/// stamped with the current wall clock.
///
/// Face order and candidate order are preserved exactly as received.
/// `max_results` bounds best + alternates, so at most `max_results - 1`
/// alternates are kept.
pub fn aggregate(response: &RecognitionResponse, max_results: u32) -> Vec<RecognitionResult> {
    aggregate_at(response, max_results, Utc::now())
}

/// [`aggregate`] with an explicit timestamp.
pub fn aggregate_at(
    response: &RecognitionResponse,
    max_results: u32,
    now: DateTime<Utc>,
) -> Vec<RecognitionResult> {
    let limit = max_results as usize;
    response
        .faces
        .iter()
        .map(|face| {
            let best = face.candidates.first().cloned();
            let alternates = if limit > 1 {
                face.candidates
                    .iter()
                    .skip(1)
                    .take(limit - 1)
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            RecognitionResult {
                face_id: face.face_id,
                bounding_box: face.bounding_box,
                recognized: best.is_some(),
                best,
                alternates,
                captured_at: now,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelink_types::{Candidate, FaceObservation};

    fn candidate(name: &str, similarity: f32) -> Candidate {
        Candidate {
            name: name.into(),
            similarity,
            identity_id: format!("id-{name}"),
        }
    }

    fn face(face_id: u32, candidates: Vec<Candidate>) -> FaceObservation {
        FaceObservation {
            face_id,
            bounding_box: None,
            candidates,
        }
    }

    #[test]
    fn preserves_face_and_candidate_order() {
        let response = RecognitionResponse {
            faces: vec![
                face(0, vec![candidate("x", 0.9), candidate("y", 0.7)]),
                face(1, vec![]),
            ],
        };
        let now = Utc::now();
        let results = aggregate_at(&response, 3, now);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].face_id, 0);
        assert!(results[0].recognized);
        assert_eq!(results[0].best.as_ref().map(|c| c.name.as_str()), Some("x"));
        assert_eq!(results[0].alternates, vec![candidate("y", 0.7)]);
        assert_eq!(results[0].captured_at, now);

        assert_eq!(results[1].face_id, 1);
        assert!(!results[1].recognized);
        assert!(results[1].best.is_none());
        assert!(results[1].alternates.is_empty());
    }

    #[test]
    fn alternates_are_capped_without_resorting() {
        let response = RecognitionResponse {
            faces: vec![face(
                7,
                vec![
                    candidate("a", 0.5),
                    candidate("b", 0.8),
                    candidate("c", 0.6),
                    candidate("d", 0.4),
                ],
            )],
        };
        let results = aggregate(&response, 3);
        let names: Vec<&str> = results[0].alternates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(results[0].best.as_ref().map(|c| c.name.as_str()), Some("a"));
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn single_result_limit_keeps_no_alternates() {
        let response = RecognitionResponse {
            faces: vec![face(0, vec![candidate("a", 0.9), candidate("b", 0.8)])],
        };
        assert!(aggregate(&response, 1)[0].alternates.is_empty());
        assert!(aggregate(&response, 0)[0].alternates.is_empty());
    }

    #[test]
    fn empty_response_yields_empty_set() {
        assert!(aggregate(&RecognitionResponse::default(), 3).is_empty());
    }
}
