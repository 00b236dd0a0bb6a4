//! Profile document model.
//!
//! The server persists whatever JSON object it is given; these types are the
//! shape clients agree on, plus the edit operations a profile page performs
//! (partial updates, new posts, pinning and reordering).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("post not found: {0}")]
    PostNotFound(String),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("index {index} out of range for {len} pinned posts")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Colorful,
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
            Theme::Colorful => write!(f, "colorful"),
        }
    }
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "colorful" => Ok(Theme::Colorful),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Social links. An empty string means the link is not set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub facebook: String,
    #[serde(default)]
    pub youtube: String,
    #[serde(default)]
    pub x: String,
}

impl Links {
    fn apply(&mut self, patch: LinksPatch) {
        if let Some(v) = patch.website {
            self.website = v;
        }
        if let Some(v) = patch.linkedin {
            self.linkedin = v;
        }
        if let Some(v) = patch.facebook {
            self.facebook = v;
        }
        if let Some(v) = patch.youtube {
            self.youtube = v;
        }
        if let Some(v) = patch.x {
            self.x = v;
        }
    }
}

fn new_post_id() -> String {
    Uuid::new_v4().to_string()
}

fn posts_with_ids<'de, D>(deserializer: D) -> Result<Vec<Post>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut posts = Vec::<Post>::deserialize(deserializer)?;
    assign_missing_ids(&mut posts);
    Ok(posts)
}

fn optional_posts_with_ids<'de, D>(deserializer: D) -> Result<Option<Vec<Post>>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut posts = Option::<Vec<Post>>::deserialize(deserializer)?;
    if let Some(posts) = posts.as_mut() {
        assign_missing_ids(posts);
    }
    Ok(posts)
}

/// Gives every id-less post an id derived from its content, so decoding the
/// same document twice yields the same ids. Identical posts are told apart
/// by how many of them came earlier in the list.
pub fn assign_missing_ids(posts: &mut [Post]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for post in posts.iter_mut().filter(|p| p.id.is_empty()) {
        let content = format!("{}\u{0}{}\u{0}{}", post.title, post.body, post.image);
        let occurrence = seen.entry(content.clone()).or_insert(0);
        let name = format!("{}\u{0}{}", content, occurrence);
        post.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string();
        *occurrence += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Stable identity for pin/reorder. Older documents carry no id; see
    /// [`assign_missing_ids`] for what those posts get.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// URL or data URL. Empty when the post has no image.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub is_pinned: bool,
}

/// Input for [`Profile::add_post`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub profile_photo: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub onboarding_completed: bool,
    #[serde(default)]
    pub links: Links,
    #[serde(default, deserialize_with = "posts_with_ids")]
    pub posts: Vec<Post>,
    /// Fields this model does not know about, carried through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A set of field changes. `None` leaves the field alone; `links` is merged
/// one level deep and `posts` replaces the whole sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<LinksPatch>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_posts_with_ids"
    )]
    pub posts: Option<Vec<Post>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
}

impl ProfilePatch {
    pub fn bio(bio: impl Into<String>) -> Self {
        Self {
            bio: Some(bio.into()),
            ..Self::default()
        }
    }

    pub fn theme(theme: Theme) -> Self {
        Self {
            theme: Some(theme),
            ..Self::default()
        }
    }

    pub fn posts(posts: Vec<Post>) -> Self {
        Self {
            posts: Some(posts),
            ..Self::default()
        }
    }

    pub fn links(links: LinksPatch) -> Self {
        Self {
            links: Some(links),
            ..Self::default()
        }
    }
}

/// Progress through the getting-started checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnboardingProgress {
    pub has_profile_info: bool,
    pub has_post: bool,
    pub has_pinned_post: bool,
    /// The user closed the checklist (`onboarding_completed`).
    pub dismissed: bool,
}

impl OnboardingProgress {
    pub const TOTAL_STEPS: usize = 3;

    pub fn completed_steps(&self) -> usize {
        [self.has_profile_info, self.has_post, self.has_pinned_post]
            .iter()
            .filter(|done| **done)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_steps() == Self::TOTAL_STEPS
    }
}

impl Profile {
    /// The document written by profile creation.
    pub fn new_default(username: &str) -> Self {
        Self {
            username: username.to_string(),
            display_name: username.to_string(),
            profile_photo: String::new(),
            bio: String::new(),
            theme: Theme::Light,
            onboarding_completed: false,
            links: Links::default(),
            posts: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn apply(&mut self, patch: ProfilePatch) {
        if let Some(v) = patch.username {
            self.username = v;
        }
        if let Some(v) = patch.display_name {
            self.display_name = v;
        }
        if let Some(v) = patch.profile_photo {
            self.profile_photo = v;
        }
        if let Some(v) = patch.bio {
            self.bio = v;
        }
        if let Some(v) = patch.theme {
            self.theme = v;
        }
        if let Some(v) = patch.onboarding_completed {
            self.onboarding_completed = v;
        }
        if let Some(links) = patch.links {
            self.links.apply(links);
        }
        if let Some(posts) = patch.posts {
            self.posts = posts;
        }
    }

    /// Prepends a new, unpinned post and returns its id.
    ///
    /// Only the first image is kept; a post shows at most one.
    pub fn add_post(&mut self, new_post: NewPost) -> Result<String, ModelError> {
        let title = new_post.title.trim();
        let body = new_post.body.trim();
        if title.is_empty() {
            return Err(ModelError::MissingField("title"));
        }
        if body.is_empty() {
            return Err(ModelError::MissingField("body"));
        }

        let image = new_post
            .images
            .into_iter()
            .map(|url| url.trim().to_string())
            .find(|url| !url.is_empty())
            .unwrap_or_default();

        let post = Post {
            id: new_post_id(),
            title: title.to_string(),
            body: body.to_string(),
            image,
            is_pinned: false,
        };
        let id = post.id.clone();
        self.posts.insert(0, post);
        Ok(id)
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    /// Flips the pinned flag of one post and returns the new value.
    pub fn toggle_pin(&mut self, id: &str) -> Result<bool, ModelError> {
        let post = self
            .posts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ModelError::PostNotFound(id.to_string()))?;
        post.is_pinned = !post.is_pinned;
        Ok(post.is_pinned)
    }

    /// Moves a pinned post from one position to another within the pinned
    /// group. Afterwards the sequence is the pinned posts in their new order
    /// followed by the unpinned posts in their previous order.
    pub fn reorder_pinned(&mut self, from: usize, to: usize) -> Result<(), ModelError> {
        let len = self.posts.iter().filter(|p| p.is_pinned).count();
        if from >= len {
            return Err(ModelError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(ModelError::IndexOutOfRange { index: to, len });
        }

        let (mut pinned, regular): (Vec<Post>, Vec<Post>) =
            std::mem::take(&mut self.posts)
                .into_iter()
                .partition(|p| p.is_pinned);

        let moved = pinned.remove(from);
        pinned.insert(to, moved);
        pinned.extend(regular);
        self.posts = pinned;
        Ok(())
    }

    /// Posts in display order: pinned first, otherwise stable.
    pub fn display_order(&self) -> Vec<&Post> {
        self.posts
            .iter()
            .filter(|p| p.is_pinned)
            .chain(self.posts.iter().filter(|p| !p.is_pinned))
            .collect()
    }

    pub fn onboarding(&self) -> OnboardingProgress {
        OnboardingProgress {
            has_profile_info: !self.bio.trim().is_empty()
                || !self.profile_photo.trim().is_empty(),
            has_post: !self.posts.is_empty(),
            has_pinned_post: self.posts.iter().any(|p| p.is_pinned),
            dismissed: self.onboarding_completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, pinned: bool) -> Post {
        Post {
            id: format!("id-{}", title),
            title: title.to_string(),
            body: format!("{} body", title),
            image: String::new(),
            is_pinned: pinned,
        }
    }

    fn titles(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.title.as_str()).collect()
    }

    #[test]
    fn test_new_default_matches_creation_shape() {
        let profile = Profile::new_default("ben");
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["username"], "ben");
        assert_eq!(json["display_name"], "ben");
        assert_eq!(json["bio"], "");
        assert_eq!(json["theme"], "light");
        assert_eq!(json["onboarding_completed"], false);
        assert_eq!(json["links"]["x"], "");
        assert_eq!(json["posts"], serde_json::json!([]));
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let profile: Profile = serde_json::from_value(serde_json::json!({
            "username": "ben",
            "display_name": "Ben",
            "profile_photo": "",
            "bio": "",
            "links": { "website": "https://example.com" },
            "posts": [{ "title": "Hi", "body": "World", "image": "", "is_pinned": false }]
        }))
        .unwrap();
        assert_eq!(profile.theme, Theme::Light);
        assert!(!profile.onboarding_completed);
        assert_eq!(profile.links.website, "https://example.com");
        assert_eq!(profile.links.youtube, "");
        assert!(!profile.posts[0].id.is_empty());
    }

    #[test]
    fn test_id_less_posts_decode_to_the_same_ids_every_time() {
        let doc = r#"{
            "username": "ben",
            "posts": [
                { "title": "Hi", "body": "World", "image": "", "is_pinned": false },
                { "title": "Hi", "body": "World", "image": "", "is_pinned": true },
                { "id": "kept", "title": "Old", "body": "Post", "image": "", "is_pinned": false }
            ]
        }"#;

        let first: Profile = serde_json::from_str(doc).unwrap();
        let second: Profile = serde_json::from_str(doc).unwrap();

        assert_eq!(first, second);
        assert_ne!(first.posts[0].id, first.posts[1].id);
        assert_eq!(first.posts[2].id, "kept");
    }

    #[test]
    fn test_pin_flag_does_not_change_derived_id() {
        let unpinned: Profile = serde_json::from_value(serde_json::json!({
            "posts": [{ "title": "Hi", "body": "World", "is_pinned": false }]
        }))
        .unwrap();
        let pinned: Profile = serde_json::from_value(serde_json::json!({
            "posts": [{ "title": "Hi", "body": "World", "is_pinned": true }]
        }))
        .unwrap();

        assert_eq!(unpinned.posts[0].id, pinned.posts[0].id);
    }

    #[test]
    fn test_decode_without_username() {
        let profile: Profile =
            serde_json::from_value(serde_json::json!({ "bio": "anonymous" })).unwrap();
        assert_eq!(profile.username, "");
        assert_eq!(profile.bio, "anonymous");
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let input = serde_json::json!({
            "username": "ben",
            "pronouns": "they/them",
            "posts": []
        });
        let profile: Profile = serde_json::from_value(input).unwrap();
        let output = serde_json::to_value(&profile).unwrap();
        assert_eq!(output["pronouns"], "they/them");
    }

    #[test]
    fn test_apply_merges_links_one_level_deep() {
        let mut profile = Profile::new_default("ben");
        profile.links.website = "https://ben.dev".to_string();
        profile.posts.push(post("keep", false));

        profile.apply(ProfilePatch::links(LinksPatch {
            youtube: Some("https://youtube.com/@ben".to_string()),
            ..LinksPatch::default()
        }));

        assert_eq!(profile.links.website, "https://ben.dev");
        assert_eq!(profile.links.youtube, "https://youtube.com/@ben");
        assert_eq!(titles(&profile.posts), vec!["keep"]);
    }

    #[test]
    fn test_apply_leaves_untouched_fields() {
        let mut profile = Profile::new_default("ben");
        profile.posts.push(post("a", true));
        profile.apply(ProfilePatch::bio("hello"));
        assert_eq!(profile.bio, "hello");
        assert_eq!(profile.display_name, "ben");
        assert_eq!(profile.posts.len(), 1);
    }

    #[test]
    fn test_add_post_prepends_and_keeps_first_image() {
        let mut profile = Profile::new_default("ben");
        profile.posts.push(post("old", false));

        let id = profile
            .add_post(NewPost {
                title: " Hi ".to_string(),
                body: "World".to_string(),
                images: vec!["".to_string(), "https://img/1.png".to_string(), "https://img/2.png".to_string()],
            })
            .unwrap();

        assert_eq!(titles(&profile.posts), vec!["Hi", "old"]);
        let created = profile.post(&id).unwrap();
        assert_eq!(created.image, "https://img/1.png");
        assert!(!created.is_pinned);
    }

    #[test]
    fn test_add_post_requires_title_and_body() {
        let mut profile = Profile::new_default("ben");
        let err = profile
            .add_post(NewPost {
                title: "  ".to_string(),
                body: "x".to_string(),
                images: vec![],
            })
            .unwrap_err();
        assert_eq!(err, ModelError::MissingField("title"));

        let err = profile
            .add_post(NewPost {
                title: "x".to_string(),
                body: String::new(),
                images: vec![],
            })
            .unwrap_err();
        assert_eq!(err, ModelError::MissingField("body"));
        assert!(profile.posts.is_empty());
    }

    #[test]
    fn test_toggle_pin_flips_only_target() {
        let mut profile = Profile::new_default("ben");
        profile.posts = vec![post("a", false), post("b", false), post("c", true)];
        let before = profile.posts.clone();

        assert!(profile.toggle_pin("id-b").unwrap());

        assert_eq!(titles(&profile.posts), vec!["a", "b", "c"]);
        for (old, new) in before.iter().zip(profile.posts.iter()) {
            assert_eq!(old.title, new.title);
            assert_eq!(old.body, new.body);
            assert_eq!(old.image, new.image);
            if old.id != "id-b" {
                assert_eq!(old.is_pinned, new.is_pinned);
            }
        }
        assert!(profile.posts[1].is_pinned);

        assert!(!profile.toggle_pin("id-b").unwrap());
        assert_eq!(profile.posts, before);
    }

    #[test]
    fn test_toggle_pin_unknown_id() {
        let mut profile = Profile::new_default("ben");
        assert_eq!(
            profile.toggle_pin("missing"),
            Err(ModelError::PostNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_display_order_is_pinned_first_and_stable() {
        let mut profile = Profile::new_default("ben");
        profile.posts = vec![
            post("a", false),
            post("b", true),
            post("c", false),
            post("d", true),
        ];
        let order: Vec<&str> = profile
            .display_order()
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_reorder_pinned_moves_within_pinned_group() {
        let mut profile = Profile::new_default("ben");
        profile.posts = vec![
            post("a", false),
            post("p1", true),
            post("p2", true),
            post("b", false),
            post("p3", true),
        ];

        profile.reorder_pinned(2, 0).unwrap();

        assert_eq!(titles(&profile.posts), vec!["p3", "p1", "p2", "a", "b"]);
    }

    #[test]
    fn test_reorder_pinned_out_of_range_changes_nothing() {
        let mut profile = Profile::new_default("ben");
        profile.posts = vec![post("a", false), post("p1", true)];
        let before = profile.posts.clone();

        let err = profile.reorder_pinned(0, 3).unwrap_err();

        assert_eq!(err, ModelError::IndexOutOfRange { index: 3, len: 1 });
        assert_eq!(profile.posts, before);
    }

    #[test]
    fn test_onboarding_progress_counts_steps() {
        let mut profile = Profile::new_default("ben");
        assert_eq!(profile.onboarding().completed_steps(), 0);

        profile.bio = "hi".to_string();
        profile.posts.push(post("a", false));
        let progress = profile.onboarding();
        assert_eq!(progress.completed_steps(), 2);
        assert!(!progress.is_complete());

        profile.posts[0].is_pinned = true;
        assert!(profile.onboarding().is_complete());
        assert!(!profile.onboarding().dismissed);
    }

    #[test]
    fn test_theme_parse_and_display() {
        assert_eq!("Dark".parse::<Theme>().unwrap(), Theme::Dark);
        assert_eq!(Theme::Colorful.to_string(), "colorful");
        assert!("neon".parse::<Theme>().is_err());
    }
}
