use crate::models::{ContentKind, MediaObject, PlaylistItemRef};

/// Playable media behind a playlist item reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub url: String,
    pub kind: ContentKind,
    pub title: String,
}

/// Snapshot of the media library, fetched once per resolution.
#[derive(Debug, Clone, Default)]
pub struct MediaIndex {
    objects: Vec<MediaObject>,
}

impl MediaIndex {
    pub fn new(objects: Vec<MediaObject>) -> Self {
        Self { objects }
    }

    fn by_id(&self, id: &str) -> Option<&MediaObject> {
        self.objects.iter().find(|m| m.id == id)
    }

    fn by_file_name(&self, name: &str) -> Option<&MediaObject> {
        self.objects.iter().find(|m| m.file_name == name)
    }
}

/// Matches, first hit wins: `media_object_id` against media id, then the
/// item's own id against media id, then title/name against file name.
pub fn resolve(item: &PlaylistItemRef, index: &MediaIndex) -> Option<ResolvedMedia> {
    let found = item
        .media_object_id
        .as_deref()
        .and_then(|id| index.by_id(id))
        .or_else(|| {
            if item.id.is_empty() {
                None
            } else {
                index.by_id(&item.id)
            }
        })
        .or_else(|| item.title.as_deref().and_then(|n| index.by_file_name(n)))
        .or_else(|| item.name.as_deref().and_then(|n| index.by_file_name(n)))?;

    let title = item
        .display_name()
        .map(str::to_string)
        .unwrap_or_else(|| found.file_name.clone());

    Some(ResolvedMedia {
        url: found.object_url.clone(),
        kind: ContentKind::from_mime(&found.mime_type),
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(id: &str, file_name: &str, mime: &str) -> MediaObject {
        MediaObject {
            id: id.to_string(),
            file_name: file_name.to_string(),
            mime_type: mime.to_string(),
            object_url: format!("https://cdn.example/{}", file_name),
        }
    }

    fn item(id: &str, media_object_id: Option<&str>, name: Option<&str>) -> PlaylistItemRef {
        PlaylistItemRef {
            id: id.to_string(),
            media_object_id: media_object_id.map(str::to_string),
            name: name.map(str::to_string),
            title: None,
            duration: None,
        }
    }

    fn index() -> MediaIndex {
        MediaIndex::new(vec![
            media("m1", "welcome.png", "image/png"),
            media("m2", "tour.mp4", "video/mp4"),
            media("i3", "menu.jpg", "image/jpeg"),
        ])
    }

    #[test]
    fn test_media_object_id_wins() {
        // Item id collides with another media object; mediaObjectId takes precedence
        let resolved = resolve(&item("i3", Some("m2"), Some("welcome.png")), &index()).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/tour.mp4");
        assert_eq!(resolved.kind, ContentKind::Video);
    }

    #[test]
    fn test_falls_back_to_item_id() {
        let resolved = resolve(&item("i3", Some("missing"), None), &index()).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/menu.jpg");
        assert_eq!(resolved.kind, ContentKind::Image);
        assert_eq!(resolved.title, "menu.jpg");
    }

    #[test]
    fn test_falls_back_to_file_name() {
        let resolved = resolve(&item("zz", None, Some("welcome.png")), &index()).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/welcome.png");
        assert_eq!(resolved.title, "welcome.png");
    }

    #[test]
    fn test_unknown_item_is_none() {
        assert!(resolve(&item("zz", Some("nope"), Some("other.png")), &index()).is_none());
        assert!(resolve(&item("m1", None, None), &MediaIndex::default()).is_none());
    }

    #[test]
    fn test_non_video_mime_is_image() {
        let index = MediaIndex::new(vec![media("d", "doc.pdf", "application/pdf")]);
        assert_eq!(
            resolve(&item("d", None, None), &index).unwrap().kind,
            ContentKind::Image
        );
    }
}
