use bytes::Bytes;
use futures::StreamExt;
use futures::executor::block_on;

use flint_core::config::StreamOptions;
use flint_core::error::{DispatchError, ErrorCategory, codes};
use flint_core::pipeline::stream_channel;

#[test]
fn clean_close_ends_the_stream_without_an_error_item() {
    let (mut producer, mut stream) = stream_channel(StreamOptions::unbounded());
    block_on(async {
        producer.send(Bytes::from_static(b"a")).await.unwrap();
        producer.send(Bytes::from_static(b"b")).await.unwrap();
        producer.close();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
        assert!(stream.next().await.is_none());
    });
}

#[test]
fn fail_delivers_the_error_then_ends() {
    let (mut producer, mut stream) = stream_channel(StreamOptions::unbounded());
    block_on(async {
        producer.send(Bytes::from_static(b"partial")).await.unwrap();
        producer
            .fail(DispatchError::new(
                codes::CALL_DEADLINE_EXCEEDED,
                "upstream took too long",
                ErrorCategory::DeadlineExceeded,
            ))
            .await;

        assert!(stream.next().await.unwrap().is_ok());
        let error = stream.next().await.unwrap().unwrap_err();
        assert_eq!(error.code(), codes::CALL_DEADLINE_EXCEEDED);
        assert!(stream.next().await.is_none(), "错误条目之后流必须结束");
    });
}

#[test]
fn dropping_the_consumer_surfaces_stream_closed() {
    let (mut producer, stream) = stream_channel(StreamOptions::unbounded());
    drop(stream);
    let error = block_on(producer.send(Bytes::from_static(b"orphan"))).unwrap_err();
    assert_eq!(error.code(), codes::STREAM_CLOSED);
}

#[test]
fn dropping_the_producer_is_a_clean_close() {
    let (producer, mut stream) = stream_channel(StreamOptions::bounded(4));
    drop(producer);
    assert!(block_on(stream.next()).is_none());
}

#[tokio::test]
async fn bounded_channel_applies_backpressure() {
    let (mut producer, mut stream) = stream_channel(StreamOptions::bounded(1));

    // 容量 1：第一条写入立即完成；第二条虽已入队，但生产端在冲刷阶段
    // 停驻，写入 Future 要等消费端腾出空间才返回。
    producer.send(Bytes::from_static(b"first")).await.unwrap();
    let mut second = Box::pin(producer.send(Bytes::from_static(b"second")));
    tokio::select! {
        _ = &mut second => panic!("写入不应在消费前完成"),
        _ = tokio::task::yield_now() => {}
    }

    assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"first"));
    second.await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"second"));
}
