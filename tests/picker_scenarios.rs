use std::sync::Arc;

use meme_picker::data::MockFeedService;
use meme_picker::display::RecordingSink;
use meme_picker::picker::{CategoryList, CycleEnd, MemePicker, FAILURE_STATUS, LOADING_STATUS};
use meme_picker::reddit::Post;

fn post(url: &str, hint: &str, is_video: bool, title: &str) -> Post {
    Post {
        title: title.into(),
        url_overridden_by_dest: Some(url.into()),
        is_video,
        post_hint: Some(hint.into()),
        ..Post::default()
    }
}

fn picker_for(feed: &Arc<MockFeedService>, sink: &Arc<RecordingSink>) -> MemePicker {
    MemePicker::new(
        CategoryList::new(["X"]).unwrap(),
        feed.clone(),
        sink.clone(),
    )
}

#[test]
fn single_image_post_is_displayed() {
    let feed = Arc::new(MockFeedService::default());
    feed.push_batch(vec![post("http://h/a.png", "image", false, "T")]);
    let sink = Arc::new(RecordingSink::default());

    let report = picker_for(&feed, &sink).show_meme();

    assert!(matches!(report.end, CycleEnd::Displayed { ref category, .. } if category == "X"));
    let state = sink.state();
    assert_eq!(state.image_source, "http://h/a.png");
    assert_eq!(state.caption_text, "T");
    assert!(state.image_visible);
    assert_eq!(state.status_text, "");
    assert_eq!(sink.statuses().first().map(String::as_str), Some(LOADING_STATUS));
}

#[test]
fn self_post_batch_causes_second_fetch() {
    let feed = Arc::new(MockFeedService::default());
    feed.push_batch(vec![post("http://h/a.png", "self", false, "first")]);
    feed.push_batch(vec![post("http://h/b.png", "image", false, "second")]);
    let sink = Arc::new(RecordingSink::default());

    let report = picker_for(&feed, &sink).show_meme();

    assert_eq!(feed.calls(), vec!["X", "X"]);
    assert_eq!(report.attempts, 2);
    assert!(!sink.images().contains(&"http://h/a.png".to_string()));
    assert_eq!(sink.state().caption_text, "second");
}

#[test]
fn network_error_stops_without_refetch() {
    let feed = Arc::new(MockFeedService::default());
    feed.push_error("network unreachable");
    let sink = Arc::new(RecordingSink::default());

    let report = picker_for(&feed, &sink).show_meme();

    assert!(matches!(report.end, CycleEnd::Failed { .. }));
    assert_eq!(feed.calls().len(), 1);
    assert_eq!(sink.state().status_text, FAILURE_STATUS);
    assert!(sink.images().is_empty());
}

#[test]
fn only_full_conjunction_is_eligible() {
    let feed = Arc::new(MockFeedService::default());
    feed.push_batch(vec![
        post("http://h/video.png", "image", true, "video"),
        post("http://h/link.png", "link", false, "link"),
        post("http://h/clip.mp4", "image", false, "clip"),
        post("http://h/ok.webp", "image", false, "ok"),
    ]);
    let sink = Arc::new(RecordingSink::default());

    let report = picker_for(&feed, &sink).show_meme();

    assert_eq!(report.attempts, 1);
    assert_eq!(sink.images(), vec!["http://h/ok.webp".to_string()]);
}

#[test]
fn retries_cover_several_empty_batches() {
    let feed = Arc::new(MockFeedService::default());
    for _ in 0..5 {
        feed.push_batch(Vec::new());
    }
    feed.push_batch(vec![post("http://h/z.gif", "image", false, "finally")]);
    let sink = Arc::new(RecordingSink::default());

    let report = picker_for(&feed, &sink).show_meme();

    assert_eq!(report.attempts, 6);
    assert_eq!(feed.calls().len(), 6);
    assert_eq!(
        sink.statuses()
            .iter()
            .filter(|s| s.starts_with("Could not find a recent image meme in r/X"))
            .count(),
        5
    );
    assert!(sink.state().image_visible);
}
