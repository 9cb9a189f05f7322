//! Blocking behavior under the wait policies: producers sleeping on a full
//! queue, consumers sleeping on an empty one, and the close/reopen
//! end-of-stream protocol.

use std::thread;
use std::time::Duration;

use styx::{BothWait, PopWait, PushWait, channel};

const QUEUE_CAPACITY: usize = 4;

#[test]
fn push_blocking_returns_immediately_when_space_exists() {
    let (producer, consumer) = channel::<i32, PushWait>(QUEUE_CAPACITY).unwrap();

    for i in 0..QUEUE_CAPACITY as i32 {
        assert!(producer.push(i).is_ok());
    }
    assert_eq!(producer.push(999), Err(999));
    assert_eq!(producer.len(), QUEUE_CAPACITY);

    // Make one slot of room; the blocking push must complete on its own.
    assert_eq!(consumer.pop(), Some(0));
    producer.push_blocking(100);
    assert_eq!(producer.len(), QUEUE_CAPACITY);

    let mut drained = Vec::new();
    while let Some(value) = consumer.pop() {
        drained.push(value);
    }
    assert_eq!(drained, vec![1, 2, 3, 100]);
}

#[test]
fn producer_blocks_until_consumer_drains() {
    const TOTAL_ITEMS: i32 = 20;

    let (producer, consumer) = channel::<i32, PushWait>(QUEUE_CAPACITY).unwrap();

    // Producer outruns the consumer five to one, so it must sleep on the
    // full queue repeatedly.
    let producer_thread = thread::spawn(move || {
        for i in 0..TOTAL_ITEMS {
            producer.push_blocking(i);
        }
    });

    let mut consumed = Vec::with_capacity(TOTAL_ITEMS as usize);
    while consumed.len() < TOTAL_ITEMS as usize {
        match consumer.pop() {
            Some(value) => {
                consumed.push(value);
                thread::sleep(Duration::from_micros(100));
            }
            None => thread::yield_now(),
        }
    }

    producer_thread.join().unwrap();
    assert_eq!(consumed, (0..TOTAL_ITEMS).collect::<Vec<_>>());
    assert!(consumer.is_empty());
}

#[test]
fn pop_blocking_returns_available_item_without_sleeping() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    for i in 0..3 {
        assert!(producer.push(i).is_ok());
    }

    assert_eq!(consumer.pop_blocking(), Some(0));
    assert_eq!(consumer.len(), 2);
}

#[test]
fn close_wakes_a_waiting_consumer() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    let consumer_thread = thread::spawn(move || consumer.pop_blocking());

    // Give the consumer time to reach the futex sleep, then end the stream
    // without ever pushing.
    thread::sleep(Duration::from_millis(100));
    producer.close();

    assert_eq!(consumer_thread.join().unwrap(), None);
}

#[test]
fn residual_elements_drain_before_end_of_stream() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    for i in 0..3 {
        assert!(producer.push(i).is_ok());
    }
    producer.close();

    // Closing does not discard what was already queued.
    assert_eq!(consumer.pop_blocking(), Some(0));
    assert_eq!(consumer.pop_blocking(), Some(1));
    assert_eq!(consumer.pop_blocking(), Some(2));
    assert_eq!(consumer.pop_blocking(), None);
}

#[test]
fn reopen_restores_blocking_pops() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    producer.close();
    assert_eq!(consumer.pop_blocking(), None);

    producer.reopen();

    // The consumer sleeps again after reopen; a push must wake it.
    let consumer_thread = thread::spawn(move || consumer.pop_blocking());
    thread::sleep(Duration::from_millis(50));
    assert!(producer.push(42).is_ok());

    assert_eq!(consumer_thread.join().unwrap(), Some(42));
}

#[test]
fn graceful_close_after_drain() {
    const TOTAL_ITEMS: i32 = 15;

    let (producer, consumer) = channel::<i32, BothWait>(QUEUE_CAPACITY).unwrap();

    let producer_thread = thread::spawn(move || {
        for i in 0..TOTAL_ITEMS {
            producer.push_blocking(i);
        }
        producer.close();
    });

    let mut consumed = Vec::with_capacity(TOTAL_ITEMS as usize);
    while let Some(value) = consumer.pop_blocking() {
        consumed.push(value);
        // Occasionally let the queue fill so the producer also waits.
        thread::sleep(Duration::from_micros(300));
    }

    producer_thread.join().unwrap();
    assert_eq!(consumed, (0..TOTAL_ITEMS).collect::<Vec<_>>());

    // The stream stays ended.
    assert_eq!(consumer.pop_blocking(), None);
}

#[test]
fn blocking_batch_push_delivers_everything() {
    const TOTAL_ITEMS: usize = 10;

    let (producer, consumer) = channel::<u32, PushWait>(QUEUE_CAPACITY).unwrap();

    let items: Vec<u32> = (0..TOTAL_ITEMS as u32).collect();
    let producer_thread = thread::spawn(move || {
        // More items than capacity: the batch must sleep and resume at
        // least once.
        producer.push_slice_blocking(&items);
    });

    let mut consumed = Vec::with_capacity(TOTAL_ITEMS);
    while consumed.len() < TOTAL_ITEMS {
        match consumer.pop() {
            Some(value) => {
                consumed.push(value);
                thread::sleep(Duration::from_micros(100));
            }
            None => thread::yield_now(),
        }
    }

    producer_thread.join().unwrap();
    assert_eq!(consumed, (0..TOTAL_ITEMS as u32).collect::<Vec<_>>());
}

#[test]
fn blocking_batch_pop_drains_until_close() {
    const TOTAL_ITEMS: i32 = 8;

    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    let producer_thread = thread::spawn(move || {
        for i in 0..TOTAL_ITEMS {
            let mut item = i;
            while let Err(returned) = producer.push(item) {
                item = returned;
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(1));
        }
        producer.close();
    });

    let mut consumed = Vec::with_capacity(16);
    loop {
        let popped = consumer.pop_into_blocking(&mut consumed);
        if popped == 0 {
            break;
        }
    }

    producer_thread.join().unwrap();
    assert_eq!(consumed, (0..TOTAL_ITEMS).collect::<Vec<_>>());
}

#[test]
fn blocking_batch_pop_on_closed_empty_queue_returns_zero() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    producer.close();

    let mut out = Vec::with_capacity(4);
    assert_eq!(consumer.pop_into_blocking(&mut out), 0);
    assert!(out.is_empty());
}

#[test]
fn blocking_batch_pop_with_no_spare_room_returns_zero() {
    let (producer, consumer) = channel::<i32, PopWait>(QUEUE_CAPACITY).unwrap();

    assert!(producer.push(1).is_ok());

    // A vector without spare capacity cannot accept anything; the call must
    // not sleep waiting for elements it could never store.
    let mut out = Vec::new();
    assert_eq!(consumer.pop_into_blocking(&mut out), 0);
    assert_eq!(consumer.len(), 1);
}
