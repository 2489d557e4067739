mod common;

use std::thread;

use common::*;
use vlf_stream::error::{Error, StreamError};
use vlf_stream::stream::{InputStream, OutputStream};

const RATE: u32 = 100;
/// Frames per block at 100 Hz
const FPB: u64 = 32;

#[test]
fn test_ephemeral_transfer() {
    let dir = scratch_dir("net-ephemeral");
    let config = fast_config(&dir);
    let port = free_port();

    let listener_config = config.clone();
    let listener = thread::spawn(move || {
        let mut input = InputStream::open(&format!("+{}", port), &listener_config).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = input.get_frame().unwrap() {
            frames.push(frame[0]);
        }
        frames
    });

    // The listener may not be up yet; an ephemeral client only tries once
    let name = format!("+127.0.0.1,{},f4", port);
    let mut output = loop {
        match OutputStream::open(&name, 1, false, RATE, &config) {
            Ok(output) => break output,
            Err(_) => thread::sleep(SHORT),
        }
    };
    output.set_timebase(epoch(2_000), 1.0).unwrap();
    write_frames(&mut output, 0, 3 * FPB);
    output.close().unwrap();

    let frames = listener.join().unwrap();
    assert_eq!(frames.len() as u64, 3 * FPB);
    for (n, v) in frames.iter().enumerate() {
        assert_eq!(*v, sample(n as u64, 0));
    }

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_persistent_listener_survives_reconnect() {
    let dir = scratch_dir("net-persistent");
    let config = fast_config(&dir);
    let port = free_port();

    let listener_config = config.clone();
    let listener = thread::spawn(move || {
        let mut input = InputStream::open(&format!("++{}", port), &listener_config).unwrap();
        let mut stamps = Vec::new();
        let mut breaks = 0;
        for _ in 0..4 * FPB {
            if input.take_break().unwrap() == Some(true) {
                breaks += 1;
            }
            stamps.push(input.timestamp().unwrap().unwrap());
            input.get_frame().unwrap().unwrap();
        }
        (stamps, breaks)
    });

    // A persistent client retries until the listener accepts
    let name = format!("++127.0.0.1,{}", port);
    for session in 0..2u64 {
        let mut output = OutputStream::open(&name, 1, false, RATE, &config).unwrap();
        let first = session * 2 * FPB;
        output
            .set_timebase(epoch(3_000) + first as f64 / RATE as f64, 1.0)
            .unwrap();
        write_frames(&mut output, first, 2 * FPB);
        output.close().unwrap();
    }

    let (stamps, breaks) = listener.join().unwrap();
    assert_eq!(stamps.len() as u64, 4 * FPB);
    assert_eq!(breaks, 0);
    let end = epoch(3_000) + (4 * FPB - 1) as f64 / RATE as f64;
    assert!(stamps[stamps.len() - 1].diff(end).abs() < 1e-6);

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_parameter_change_across_reconnect_is_fatal() {
    let dir = scratch_dir("net-params");
    let config = fast_config(&dir);
    let port = free_port();

    let listener_config = config.clone();
    let listener = thread::spawn(move || {
        let mut input = InputStream::open(&format!("++{}", port), &listener_config).unwrap();
        loop {
            match input.get_frame() {
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(e) => return Some(e),
            }
        }
    });

    let name = format!("++127.0.0.1,{}", port);
    for channels in [1, 2] {
        let mut output = OutputStream::open(&name, channels, false, RATE, &config).unwrap();
        output.set_timebase(epoch(4_000), 1.0).unwrap();
        write_frames(&mut output, 0, FPB);
        output.close().unwrap();
    }

    let err = listener.join().unwrap().expect("listener should fail");
    assert!(matches!(err, Error::Stream(StreamError::ParametersChanged(_))));

    std::fs::remove_dir_all(dir).unwrap();
}
