//! End-to-end loader scenarios against an in-memory byte source

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{
    png_bytes, test_config, wait_until, CountingCache, FakeSource, FlakyDecoder, Recorder,
    TestTarget,
};
use image_loader_cache::{DecodedImage, PixelFormat};
use image_loader_core::{
    DisplayOptions, DisplayTarget, FailType, ImageLoader, ImageSize, LoadingListener,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn cached_in_memory() -> DisplayOptions {
    DisplayOptions::builder().cache_in_memory(true).build()
}

fn cached_everywhere() -> DisplayOptions {
    DisplayOptions::builder()
        .cache_in_memory(true)
        .cache_on_disk(true)
        .build()
}

fn listener(recorder: &Arc<Recorder>) -> Option<Arc<dyn LoadingListener>> {
    Some(recorder.clone())
}

#[test]
fn test_concurrent_requests_share_one_download() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/shared.png", 16, 16);
    source.delay("http://img/shared.png", Duration::from_millis(150));
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();

    let options = cached_in_memory();
    let first = Recorder::new();
    let second = Recorder::new();
    let size = ImageSize::new(16, 16);
    loader.display_image_with(
        "http://img/shared.png",
        TestTarget::new(size),
        Some(&options),
        listener(&first),
    );
    loader.display_image_with(
        "http://img/shared.png",
        TestTarget::new(size),
        Some(&options),
        listener(&second),
    );

    assert!(wait_until(WAIT, || {
        first.terminal_count() == 1 && second.terminal_count() == 1
    }));
    assert_eq!(source.calls_for("http://img/shared.png"), 1);
    assert_eq!(first.events(), vec!["started http://img/shared.png", "complete http://img/shared.png"]);
    assert_eq!(second.events(), vec!["started http://img/shared.png", "complete http://img/shared.png"]);
}

#[test]
fn test_rebound_target_never_shows_stale_image() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/slow.png", 10, 10);
    source.serve("http://img/fast.png", 20, 20);
    source.delay("http://img/slow.png", Duration::from_millis(200));
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();

    let target = TestTarget::new(ImageSize::new(64, 64));
    let stale = Recorder::new();
    let fresh = Recorder::new();
    loader.display_image_with("http://img/slow.png", target.clone(), None, listener(&stale));
    thread::sleep(Duration::from_millis(30));
    loader.display_image_with("http://img/fast.png", target.clone(), None, listener(&fresh));

    assert!(wait_until(WAIT, || stale.terminal_count() == 1 && fresh.terminal_count() == 1));
    assert_eq!(stale.events().last().unwrap(), "cancelled http://img/slow.png");
    assert_eq!(fresh.events().last().unwrap(), "complete http://img/fast.png");
    assert!(!target.shown_widths().contains(&10));
    assert_eq!(target.current().unwrap().width(), 20);
}

#[test]
fn test_cancel_display_task_unbinds_target() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/a.png", 10, 10);
    source.delay("http://img/a.png", Duration::from_millis(100));
    let loader = ImageLoader::new(test_config(&dir, source).build().unwrap()).unwrap();

    let target = TestTarget::new(ImageSize::new(32, 32));
    let recorder = Recorder::new();
    loader.display_image_with("http://img/a.png", target.clone(), None, listener(&recorder));
    assert_eq!(
        loader.loading_uri_for(target.as_ref()).as_deref(),
        Some("http://img/a.png")
    );

    loader.cancel_display_task(target.as_ref());
    assert_eq!(loader.loading_uri_for(target.as_ref()), None);
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));
    assert_eq!(recorder.events().last().unwrap(), "cancelled http://img/a.png");
    assert!(target.shown_widths().is_empty());
}

#[test]
fn test_pause_holds_tasks_until_resume() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    for index in 0..3 {
        source.serve(&format!("http://img/{index}.png"), 8, 8);
    }
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();

    loader.pause();
    let recorder = Recorder::new();
    for index in 0..3 {
        loader.display_image_with(
            &format!("http://img/{index}.png"),
            TestTarget::new(ImageSize::new(8, 8)),
            None,
            listener(&recorder),
        );
    }

    thread::sleep(Duration::from_millis(150));
    assert_eq!(source.total(), 0);
    assert_eq!(recorder.terminal_count(), 0);

    loader.resume();
    assert!(wait_until(WAIT, || recorder.terminal_count() == 3));
    assert_eq!(source.total(), 3);
}

#[test]
fn test_memory_hit_skips_the_downloader() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/hot.png", 12, 12);
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();
    let options = cached_in_memory();
    let size = ImageSize::new(12, 12);

    let first = Recorder::new();
    loader.display_image_with("http://img/hot.png", TestTarget::new(size), Some(&options), listener(&first));
    assert!(wait_until(WAIT, || first.terminal_count() == 1));

    let second = Recorder::new();
    let target = TestTarget::new(size);
    loader.display_image_with("http://img/hot.png", target.clone(), Some(&options), listener(&second));
    assert!(wait_until(WAIT, || second.terminal_count() == 1));

    assert_eq!(source.calls_for("http://img/hot.png"), 1);
    assert_eq!(target.current().unwrap().width(), 12);
    assert!(first.images.lock()[0].ptr_eq(&second.images.lock()[0]));
}

#[test]
fn test_memory_hit_with_post_processor_runs_off_thread() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/post.png", 12, 12);
    let loader = ImageLoader::new(test_config(&dir, source).build().unwrap()).unwrap();
    let size = ImageSize::new(12, 12);

    let warm = Recorder::new();
    loader.display_image_with("http://img/post.png", TestTarget::new(size), Some(&cached_in_memory()), listener(&warm));
    assert!(wait_until(WAIT, || warm.terminal_count() == 1));

    let options = DisplayOptions::builder()
        .cache_in_memory(true)
        .post_processor(|_: DecodedImage| DecodedImage::blank(1, 1, PixelFormat::Argb8888))
        .build();
    let recorder = Recorder::new();
    let target = TestTarget::new(size);
    loader.display_image_with("http://img/post.png", target.clone(), Some(&options), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));
    assert_eq!(target.current().unwrap().width(), 1);
}

#[test]
fn test_out_of_memory_retries_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/big.png", 10, 10);
    let cache = CountingCache::new(1024 * 1024);
    let decoder = FlakyDecoder::new(2, cache.clone());
    let config = test_config(&dir, source)
        .memory_cache(cache.clone())
        .decoder(decoder.clone())
        .build()
        .unwrap();
    let loader = ImageLoader::new(config).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with("http://img/big.png", TestTarget::new(ImageSize::new(10, 10)), None, listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.events().last().unwrap(), "complete http://img/big.png");
    assert_eq!(decoder.attempts.load(Ordering::SeqCst), 3);
    // the first retry only backs off; the second clears the memory cache
    assert_eq!(*decoder.clears_seen.lock(), vec![0, 0, 1]);
    assert_eq!(cache.clears.load(Ordering::SeqCst), 1);
}

#[test]
fn test_out_of_memory_gives_up_after_three_attempts() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/huge.png", 10, 10);
    let cache = CountingCache::new(1024 * 1024);
    let decoder = FlakyDecoder::new(usize::MAX, cache.clone());
    let config = test_config(&dir, source.clone())
        .memory_cache(cache)
        .decoder(decoder.clone())
        .build()
        .unwrap();
    let loader = ImageLoader::new(config).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with("http://img/huge.png", TestTarget::new(ImageSize::new(10, 10)), None, listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(decoder.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(source.total(), 1);
    assert_eq!(recorder.failures.lock()[0].kind(), FailType::OutOfMemory);
}

#[test]
fn test_out_of_memory_without_handling_fails_at_once() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/huge.png", 10, 10);
    let cache = CountingCache::new(1024 * 1024);
    let decoder = FlakyDecoder::new(usize::MAX, cache.clone());
    let config = test_config(&dir, source)
        .memory_cache(cache.clone())
        .decoder(decoder.clone())
        .handle_out_of_memory(false)
        .build()
        .unwrap();
    let loader = ImageLoader::new(config).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with("http://img/huge.png", TestTarget::new(ImageSize::new(10, 10)), None, listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(decoder.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(cache.clears.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.failures.lock()[0].kind(), FailType::OutOfMemory);
}

#[test]
fn test_failure_shows_fail_image() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    let loader = ImageLoader::new(test_config(&dir, source).build().unwrap()).unwrap();

    let options = DisplayOptions::builder()
        .image_on_fail(DecodedImage::blank(5, 5, PixelFormat::Argb8888))
        .build();
    let target = TestTarget::new(ImageSize::new(8, 8));
    let recorder = Recorder::new();
    loader.display_image_with("http://img/missing.png", target.clone(), Some(&options), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.failures.lock()[0].kind(), FailType::IoError);
    assert_eq!(target.current().unwrap().width(), 5);
}

#[test]
fn test_network_denied_fails_network_uris() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("https://img/remote.png", 8, 8);
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();
    loader.deny_network_downloads(true);

    let recorder = Recorder::new();
    loader.display_image_with("https://img/remote.png", TestTarget::new(ImageSize::new(8, 8)), None, listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.failures.lock()[0].kind(), FailType::NetworkDenied);
    assert_eq!(source.total(), 0);

    loader.deny_network_downloads(false);
    let retry = Recorder::new();
    loader.display_image_with("https://img/remote.png", TestTarget::new(ImageSize::new(8, 8)), None, listener(&retry));
    assert!(wait_until(WAIT, || retry.terminal_count() == 1));
    assert_eq!(retry.events().last().unwrap(), "complete https://img/remote.png");
}

#[test]
fn test_disk_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let uri = "http://img/persist.png";
    {
        let source = FakeSource::new();
        source.serve(uri, 10, 10);
        let loader = ImageLoader::new(test_config(&dir, source).build().unwrap()).unwrap();
        let recorder = Recorder::new();
        loader.display_image_with(uri, TestTarget::new(ImageSize::new(10, 10)), Some(&cached_everywhere()), listener(&recorder));
        assert!(wait_until(WAIT, || recorder.terminal_count() == 1));
    }

    // nothing to download from now on
    let offline = FakeSource::new();
    let loader = ImageLoader::new(test_config(&dir, offline.clone()).build().unwrap()).unwrap();
    let stored = loader.disk_cache().get(uri).unwrap().into_bytes().unwrap();
    assert_eq!(stored, png_bytes(10, 10));

    let recorder = Recorder::new();
    let target = TestTarget::new(ImageSize::new(10, 10));
    loader.display_image_with(uri, target.clone(), Some(&cached_everywhere()), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));
    assert_eq!(recorder.events().last().unwrap(), "complete http://img/persist.png");
    assert_eq!(offline.total(), 0);
    assert_eq!(target.current().unwrap().width(), 10);
}

#[test]
fn test_corrupt_disk_entry_is_refetched() {
    let dir = TempDir::new().unwrap();
    let uri = "http://img/corrupt.png";
    let source = FakeSource::new();
    source.serve(uri, 6, 6);
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();
    assert!(loader.disk_cache().put(uri, &mut &b"not an image"[..]).unwrap());

    let recorder = Recorder::new();
    loader.display_image_with(uri, TestTarget::new(ImageSize::new(6, 6)), Some(&cached_everywhere()), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.events().last().unwrap(), "complete http://img/corrupt.png");
    assert_eq!(source.calls_for(uri), 1);
    let stored = loader.disk_cache().get(uri).unwrap().into_bytes().unwrap();
    assert_eq!(stored, png_bytes(6, 6));
}

#[test]
fn test_undecodable_download_is_not_cached_on_disk() {
    let dir = TempDir::new().unwrap();
    let uri = "http://img/garbage.png";
    let source = FakeSource::new();
    source.serve_bytes(uri, b"definitely not an image");
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with(uri, TestTarget::new(ImageSize::new(8, 8)), Some(&cached_everywhere()), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.failures.lock()[0].kind(), FailType::DecodingError);
    assert!(!loader.disk_cache().exists(uri));
    assert!(loader.memory_cache().keys().is_empty());
}

#[test]
fn test_out_of_memory_failure_is_not_cached_on_disk() {
    let dir = TempDir::new().unwrap();
    let uri = "http://img/oom.png";
    let source = FakeSource::new();
    source.serve(uri, 10, 10);
    let cache = CountingCache::new(1024 * 1024);
    let config = test_config(&dir, source)
        .memory_cache(cache.clone())
        .decoder(FlakyDecoder::new(usize::MAX, cache))
        .build()
        .unwrap();
    let loader = ImageLoader::new(config).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with(uri, TestTarget::new(ImageSize::new(10, 10)), Some(&cached_everywhere()), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    assert_eq!(recorder.failures.lock()[0].kind(), FailType::OutOfMemory);
    assert!(!loader.disk_cache().exists(uri));
}

#[test]
fn test_disk_bound_shrinks_stored_image() {
    let dir = TempDir::new().unwrap();
    let uri = "http://img/large.png";
    let source = FakeSource::new();
    source.serve(uri, 32, 32);
    let config = test_config(&dir, source)
        .max_image_size_for_disk_cache(8, 8)
        .build()
        .unwrap();
    let loader = ImageLoader::new(config).unwrap();

    let recorder = Recorder::new();
    loader.display_image_with(uri, TestTarget::new(ImageSize::new(32, 32)), Some(&cached_everywhere()), listener(&recorder));
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    let stored = loader.disk_cache().get(uri).unwrap().into_bytes().unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 8));
}

#[test]
fn test_stop_interrupts_silently_and_loader_stays_usable() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/later.png", 8, 8);
    let loader = ImageLoader::new(test_config(&dir, source.clone()).build().unwrap()).unwrap();

    let delayed = DisplayOptions::builder()
        .delay_before_loading(Duration::from_millis(300))
        .build();
    let recorder = Recorder::new();
    loader.display_image_with("http://img/later.png", TestTarget::new(ImageSize::new(8, 8)), Some(&delayed), listener(&recorder));
    thread::sleep(Duration::from_millis(50));
    loader.stop();

    thread::sleep(Duration::from_millis(500));
    assert_eq!(recorder.events(), vec!["started http://img/later.png"]);
    assert_eq!(source.total(), 0);

    let again = Recorder::new();
    loader.display_image_with("http://img/later.png", TestTarget::new(ImageSize::new(8, 8)), None, listener(&again));
    assert!(wait_until(WAIT, || again.terminal_count() == 1));
    assert_eq!(again.events().last().unwrap(), "complete http://img/later.png");
}

#[test]
fn test_empty_uri_on_manual_queue() {
    let dir = TempDir::new().unwrap();
    let (loader, queue) =
        ImageLoader::with_manual_completion(test_config(&dir, FakeSource::new()).build().unwrap());

    let options = DisplayOptions::builder()
        .image_for_empty_uri(DecodedImage::blank(3, 3, PixelFormat::Argb8888))
        .build();
    let target = TestTarget::new(ImageSize::new(8, 8));
    let recorder = Recorder::new();
    loader.display_image_with("", target.clone(), Some(&options), listener(&recorder));

    // nothing is applied until the host drains the queue
    assert!(recorder.events().is_empty());
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(recorder.events(), vec!["started ", "complete "]);
    assert_eq!(target.current().unwrap().width(), 3);
}

#[test]
fn test_manual_queue_applies_display_on_host_thread() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/q.png", 4, 4);
    let (loader, queue) =
        ImageLoader::with_manual_completion(test_config(&dir, source).build().unwrap());

    let stub = DecodedImage::blank(2, 2, PixelFormat::Argb8888);
    let options = DisplayOptions::builder().stub_image(stub).build();
    let target = TestTarget::new(ImageSize::new(4, 4));
    let recorder = Recorder::new();
    loader.display_image_with("http://img/q.png", target.clone(), Some(&options), listener(&recorder));

    assert!(wait_until(WAIT, || {
        queue.run_for(Duration::from_millis(20));
        recorder.terminal_count() == 1
    }));
    assert_eq!(target.shown_widths(), vec![2, 4]);
    assert_eq!(
        recorder.events(),
        vec!["started http://img/q.png", "complete http://img/q.png"]
    );
}

#[test]
fn test_load_image_reports_through_listener_only() {
    let dir = TempDir::new().unwrap();
    let source = FakeSource::new();
    source.serve("http://img/bg.png", 40, 20);
    let loader = ImageLoader::new(test_config(&dir, source).build().unwrap()).unwrap();

    let recorder = Recorder::new();
    loader.load_image("http://img/bg.png", Some(ImageSize::new(10, 10)), None, recorder.clone());
    assert!(wait_until(WAIT, || recorder.terminal_count() == 1));

    let image = recorder.images.lock()[0].clone();
    assert!(image.width() <= 40 && image.width() >= 10);
}

#[test]
fn test_display_target_is_object_safe_for_callers() {
    let target: Arc<dyn DisplayTarget> = TestTarget::new(ImageSize::new(1, 1));
    assert_eq!(target.size_hint(), ImageSize::new(1, 1));
}
