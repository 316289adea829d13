//! Response payloads for the mutation endpoints.
//!
//! Authoritative counts are optional: a backend that returns them enables
//! field-by-field reconciliation, one that omits them triggers the
//! coordinator's re-fetch fallback.

use serde::{Deserialize, Serialize};

/// Response to like/unlike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    /// Server-confirmed like count, if the backend returns one.
    #[serde(default)]
    pub likes_count: Option<u64>,
    /// Server-confirmed liked flag, if the backend returns one.
    #[serde(default)]
    pub liked: Option<bool>,
}

/// Response to follow/unfollow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowResponse {
    #[serde(default)]
    pub followers_count: Option<u64>,
    #[serde(default)]
    pub following: Option<bool>,
}

/// Response to comment creation. The id is the authoritative server id that
/// replaces the optimistic temporary id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreateResponse {
    pub id: String,
    #[serde(default)]
    pub comments_count: Option<u64>,
}

/// Response to comment deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDeleteResponse {
    #[serde(default)]
    pub comments_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_response_defaults_to_no_counts() {
        let response: LikeResponse = serde_json::from_str("{}").unwrap();
        assert!(response.likes_count.is_none());
        assert!(response.liked.is_none());
    }

    #[test]
    fn like_response_with_counts() {
        let response: LikeResponse =
            serde_json::from_str(r#"{"likesCount":6,"liked":true}"#).unwrap();
        assert_eq!(response.likes_count, Some(6));
        assert_eq!(response.liked, Some(true));
    }

    #[test]
    fn comment_create_response_requires_id() {
        let response: CommentCreateResponse =
            serde_json::from_str(r#"{"id":"c-42"}"#).unwrap();
        assert_eq!(response.id, "c-42");
        assert!(response.comments_count.is_none());

        assert!(serde_json::from_str::<CommentCreateResponse>("{}").is_err());
    }
}
