// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deferral basics: fake replies, lazy vs eager wakes, bypasses, poisoning.

mod support;

use std::time::Duration;

use openbehind::{Errno, Fd, Inode, Loc, OpenBehind, OpenBehindConfig, OpenFlags};
use pretty_assertions::assert_eq;
use support::{Call, MockBackend};

fn lazy_layer(mock: &MockBackend) -> OpenBehind<MockBackend> {
    OpenBehind::new(mock.clone(), OpenBehindConfig::enabled())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn lazy_open_and_release_never_touch_backend() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");

    layer.release(&fd);
    drop(fd);
    layer.forget(&inode);

    assert_eq!(mock.open_attempts(), 0);
}

#[tokio::test]
async fn eager_open_launches_exactly_one_backend_open() {
    let mock = MockBackend::new();
    let config = OpenBehindConfig {
        lazy_open: false,
        ..OpenBehindConfig::enabled()
    };
    let layer = OpenBehind::new(mock.clone(), config);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");

    let probe = mock.clone();
    wait_until(move || probe.open_attempts() == 1).await;

    layer.release(&fd);
    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn write_forces_open_then_runs_behind_it() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");

    let written = layer
        .write(&fd, "x".into(), 0, OpenFlags::empty())
        .await
        .expect("write succeeds");
    assert_eq!(written, 1);

    assert_eq!(
        mock.calls(),
        vec![
            Call::Open {
                path: "/a".to_owned(),
                fd: fd.id(),
                direct: false,
            },
            Call::Write {
                fd: fd.id(),
                offset: 0,
            },
        ],
    );
}

#[tokio::test]
async fn failed_backend_open_poisons_the_handle() {
    let mock = MockBackend::new();
    mock.fail_open("/a", Errno::NoEnt);
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("the fake reply succeeds even for a missing file");

    assert_eq!(layer.fstat(&fd).await, Err(Errno::NoEnt));
    // The poison is permanent.
    assert_eq!(layer.fstat(&fd).await, Err(Errno::NoEnt));
    assert_eq!(
        layer.write(&fd, "x".into(), 0, OpenFlags::empty()).await,
        Err(Errno::NoEnt),
    );
    // Exactly one backend open was attempted.
    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn truncating_open_is_forwarded_synchronously() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(
            Loc::new("/a", &inode),
            OpenFlags::RDWR | OpenFlags::TRUNC,
            &fd,
            None,
        )
        .await
        .expect("forwarded open succeeds");

    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn flush_with_unlaunched_open_short_circuits() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");

    layer.flush(&fd).await.expect("nothing to flush");
    assert!(mock.calls().is_empty());

    // Once the open has really happened, flush is forwarded again.
    layer
        .write(&fd, "x".into(), 0, OpenFlags::empty())
        .await
        .expect("write succeeds");
    layer.flush(&fd).await.expect("flush forwarded");
    assert_eq!(
        mock.calls().last(),
        Some(&Call::Flush { fd: fd.id() }),
    );
}

#[tokio::test]
async fn disabled_layer_forwards_every_open() {
    let mock = MockBackend::new();
    let layer = OpenBehind::new(mock.clone(), OpenBehindConfig::default());

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("forwarded open succeeds");

    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn pass_through_behaves_like_disabled() {
    let mock = MockBackend::new();
    let config = OpenBehindConfig {
        pass_through: true,
        ..OpenBehindConfig::enabled()
    };
    let layer = OpenBehind::new(mock.clone(), config);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("forwarded open succeeds");

    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn reconfigure_applies_to_later_opens_only() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");
    assert_eq!(mock.open_attempts(), 0);

    layer.reconfigure(OpenBehindConfig::default());

    let other = Inode::new();
    let fd2 = Fd::create(&other);
    layer
        .open(Loc::new("/b", &other), OpenFlags::empty(), &fd2, None)
        .await
        .expect("forwarded open succeeds");
    assert_eq!(mock.open_attempts(), 1);
}

#[tokio::test]
async fn statedump_reports_pending_open() {
    let mock = MockBackend::new();
    let layer = lazy_layer(&mock);

    let inode = Inode::new();
    let fd = Fd::create(&inode);
    layer
        .open(Loc::new("/dumped", &inode), OpenFlags::empty(), &fd, None)
        .await
        .expect("deferred open replies success");

    let mut out = String::new();
    layer.dump(&mut out).expect("dump succeeds");
    assert!(out.contains("lazy_open=true"));
    assert!(out.contains("open_pending=yes"));
    assert!(out.contains("loc.path=/dumped"));

    layer.release(&fd);
    let mut out = String::new();
    layer.dump(&mut out).expect("dump succeeds");
    assert!(!out.contains("open_pending=yes"));
}
