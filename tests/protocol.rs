use std::io;
use std::thread;
use std::time::Duration;

use v4l_loopback::buffer::{Metadata, Type};
use v4l_loopback::config::EndpointConfig;
use v4l_loopback::device::{self, Driver, Format, Geometry, Operation};
use v4l_loopback::io::traits::{CaptureStream, OutputStream};
use v4l_loopback::io::{Owner, Stream};
use v4l_loopback::loopback::{self, Call, Event, Loopback};
use v4l_loopback::FourCC;

const NAME: &str = "loopback0";

fn source_config() -> EndpointConfig {
    EndpointConfig::new(NAME, Type::VideoOutput)
        .format(Format::new(64, 48, FourCC::YU12))
        .timeout(Duration::from_secs(5))
}

fn sink_config() -> EndpointConfig {
    EndpointConfig::new(NAME, Type::VideoCapture).timeout(Duration::from_secs(5))
}

/// Loopback whose dequeue always reports the same buffer
struct Rogue {
    dev: Loopback,
    answer: u32,
}

struct RogueHandle {
    inner: loopback::Handle,
    answer: u32,
}

impl Driver for Rogue {
    type Handle = RogueHandle;

    fn open(&self, name: &str) -> io::Result<RogueHandle> {
        Ok(RogueHandle {
            inner: self.dev.open(name)?,
            answer: self.answer,
        })
    }
}

impl device::Handle for RogueHandle {
    type Region = loopback::Region;

    fn negotiate_format(&mut self, typ: Type, format: &Format) -> io::Result<Format> {
        self.inner.negotiate_format(typ, format)
    }

    fn request_buffers(&mut self, typ: Type, count: u32) -> io::Result<u32> {
        self.inner.request_buffers(typ, count)
    }

    fn query_buffer(&mut self, typ: Type, index: u32) -> io::Result<Geometry> {
        self.inner.query_buffer(typ, index)
    }

    fn map_buffer(&mut self, offset: u32, length: usize) -> io::Result<loopback::Region> {
        self.inner.map_buffer(offset, length)
    }

    fn submit_buffer(&mut self, typ: Type, index: u32, meta: &Metadata) -> io::Result<()> {
        self.inner.submit_buffer(typ, index, meta)
    }

    fn retrieve_buffer(
        &mut self,
        _typ: Type,
        _timeout: Option<Duration>,
    ) -> io::Result<(u32, Metadata)> {
        Ok((self.answer, Metadata::default()))
    }

    fn start_streaming(&mut self, typ: Type) -> io::Result<()> {
        self.inner.start_streaming(typ)
    }

    fn stop_streaming(&mut self, typ: Type) -> io::Result<()> {
        self.inner.stop_streaming(typ)
    }
}

#[test]
fn queueing_twice_is_refused_before_the_device() {
    let dev = Loopback::new(NAME);
    let mut source = Stream::open(&dev, &source_config()).unwrap();

    source.queue(0).unwrap();
    let err = source.queue(0).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(err.operation(), Operation::Queue);
    assert_eq!(err.index(), Some(0));
    assert_eq!(dev.count(Call::Submit), 1);

    let err = source.queue(2).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(dev.count(Call::Submit), 1);
    assert!(source.ownership().is_owned_by_device(0));
    assert!(source.ownership().is_owned_by_app(1));
}

#[test]
fn device_returning_an_owned_buffer_is_a_violation() {
    let rogue = Rogue {
        dev: Loopback::new(NAME),
        answer: 0,
    };
    let mut source = Stream::open(&rogue, &source_config()).unwrap();

    let err = source.dequeue().unwrap_err();
    match err {
        v4l_loopback::Error::ProtocolViolation {
            op, index, owner, ..
        } => {
            assert_eq!(op, Operation::Dequeue);
            assert_eq!(index, 0);
            assert_eq!(owner, Owner::Application);
        }
        e => panic!("unexpected error: {}", e),
    }
    assert_eq!(source.ownership().app_owned(), 2);
}

#[test]
fn device_returning_an_unknown_buffer_is_a_violation() {
    let rogue = Rogue {
        dev: Loopback::new(NAME),
        answer: 5,
    };
    let mut source = Stream::open(&rogue, &source_config()).unwrap();
    source.queue(0).unwrap();

    let err = source.dequeue().unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(
        err.to_string(),
        "Source DQBUF index 5: protocol violation, buffer is out of range"
    );
    assert!(source.ownership().is_owned_by_device(0));
}

#[test]
fn device_owned_buffers_are_not_accessible() {
    let dev = Loopback::new(NAME);
    let mut source = Stream::open(&dev, &source_config()).unwrap();
    source.queue(0).unwrap();

    let err = source.get_mut(0).unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(err.operation(), Operation::Access);
    assert!(source.get(0).is_err());
    assert!(source.get_meta(0).is_err());
    assert!(source.get(9).is_err());

    assert_eq!(source.get_mut(1).unwrap().len(), 64 * 48 * 3 / 2);
}

#[test]
fn failed_submit_leaves_the_buffer_with_the_device() {
    let dev = Loopback::new(NAME);
    dev.fail_on(Call::Submit, 0);
    let mut source = Stream::open(&dev, &source_config()).unwrap();

    let err = source.queue(0).unwrap_err();
    assert!(err.is_device());
    assert_eq!(err.operation(), Operation::Queue);
    assert_eq!(err.index(), Some(0));
    assert!(source.ownership().is_owned_by_device(0));

    // the next feed moves on to the remaining buffer
    assert_eq!(source.feed().unwrap(), 1);
}

#[test]
fn dequeue_times_out() {
    let dev = Loopback::new(NAME);
    let cfg = source_config().timeout(Duration::from_millis(20));
    let mut source = Stream::open(&dev, &cfg).unwrap();
    v4l_loopback::io::traits::Stream::start(&mut source).unwrap();

    let err = source.dequeue().unwrap_err();
    assert!(err.is_device());
    assert_eq!(err.kind(), Some(io::ErrorKind::TimedOut));
    assert_eq!(err.operation(), Operation::Dequeue);
    assert_eq!(source.ownership().app_owned(), 2);
}

#[test]
fn timeout_can_be_changed_on_an_open_stream() {
    let dev = Loopback::new(NAME);
    let mut source = Stream::open(&dev, &EndpointConfig::new(NAME, Type::VideoOutput)).unwrap();
    let mut sink = Stream::open(&dev, &EndpointConfig::new(NAME, Type::VideoCapture)).unwrap();
    v4l_loopback::io::traits::Stream::start(&mut source).unwrap();

    source.set_timeout(Duration::from_millis(20));
    let err = source.dequeue().unwrap_err();
    assert_eq!(err.kind(), Some(io::ErrorKind::TimedOut));

    // without a timeout the dequeue waits until the frame arrives
    source.clear_timeout();
    source.feed().unwrap();
    let consumer = thread::spawn(move || {
        let index = CaptureStream::next(&mut sink).unwrap();
        (sink, index)
    });
    assert_eq!(source.dequeue().unwrap(), 0);
    let (sink, index) = consumer.join().unwrap();
    assert_eq!(index, 0);
    assert_eq!(sink.in_hand(), Some(0));
}

#[test]
fn failed_mapping_unmaps_what_was_mapped() {
    let dev = Loopback::new(NAME);
    dev.set_max_buffers(3);
    dev.fail_on(Call::Map, 1);

    let err = Stream::open(&dev, &source_config().buffers(3)).err().unwrap();
    assert!(err.is_device());
    assert_eq!(err.operation(), Operation::MapBuffer);
    assert_eq!(err.index(), Some(1));

    let calls = dev.calls();
    let failed = calls
        .iter()
        .position(|e| e.call == Call::Map && e.index == Some(1))
        .unwrap();
    let unmapped = Event {
        call: Call::Unmap,
        typ: Some(Type::VideoOutput),
        index: Some(0),
    };
    assert!(calls[failed..].contains(&unmapped));
    assert_eq!(calls.last().map(|e| e.call), Some(Call::Close));
    assert_eq!(dev.mapped(Type::VideoOutput), 0);
    assert_eq!(dev.count(Call::Map), 2);

    // nothing is left behind, the next attempt succeeds
    let source = Stream::open(&dev, &source_config().buffers(3)).unwrap();
    assert_eq!(source.len(), 3);
}

#[test]
fn oversized_format_is_a_device_error() {
    let dev = Loopback::new(NAME);
    let cfg = source_config().format(Format::new(65535, 65537, FourCC::new(b"GREY")));
    let err = Stream::open(&dev, &cfg).err().unwrap();
    assert!(err.is_device());
    assert_eq!(err.operation(), Operation::NegotiateFormat);
    assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    assert_eq!(dev.mapped(Type::VideoOutput), 0);
}

#[test]
fn sink_needs_a_source_format() {
    let dev = Loopback::new(NAME);
    let err = Stream::open(&dev, &sink_config()).err().unwrap();
    assert_eq!(err.operation(), Operation::RequestBuffers);
    assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
}

#[test]
fn holding_a_buffer_needs_two() {
    let dev = Loopback::new(NAME);
    dev.set_max_buffers(1);
    let _source = Stream::open(&dev, &source_config()).unwrap();
    let mut sink = Stream::open(&dev, &sink_config()).unwrap();
    assert_eq!(sink.len(), 1);

    let err = sink.prime().unwrap_err();
    assert_eq!(err.kind(), Some(io::ErrorKind::InvalidInput));
    assert_eq!(err.operation(), Operation::Access);
    assert_eq!(dev.count(Call::Submit), 0);
}

#[test]
fn drop_unmaps_before_releasing() {
    let dev = Loopback::new(NAME);
    let mut source = Stream::open(&dev, &source_config()).unwrap();
    source.feed().unwrap();
    v4l_loopback::io::traits::Stream::start(&mut source).unwrap();
    dev.clear_calls();

    drop(source);

    let calls: Vec<Call> = dev.calls().iter().map(|e| e.call).collect();
    assert_eq!(
        calls,
        vec![
            Call::StreamOff,
            Call::Unmap,
            Call::Unmap,
            Call::RequestBuffers,
            Call::Close
        ]
    );
    assert_eq!(dev.held(Type::VideoOutput), 0);
}

#[test]
fn source_and_sink_on_separate_threads() {
    let dev = Loopback::new(NAME);
    let mut source = Stream::open(&dev, &source_config()).unwrap();
    let mut sink = Stream::open(&dev, &sink_config()).unwrap();

    let producer = thread::spawn(move || {
        for _ in 0..20 {
            OutputStream::next(&mut source).unwrap();
        }
        source
    });
    let consumer = thread::spawn(move || {
        let mut sequences = Vec::new();
        for _ in 0..18 {
            let index = CaptureStream::next(&mut sink).unwrap();
            sequences.push(sink.get_meta(index).unwrap().sequence);
            assert_eq!(sink.ownership().app_owned(), 1);
        }
        (sink, sequences)
    });

    let source = producer.join().unwrap();
    let (sink, sequences) = consumer.join().unwrap();
    assert_eq!(sequences, (0..18).collect::<Vec<u32>>());
    assert!(source.ownership().device_owned() <= 2);

    drop(sink);
    drop(source);
    assert_eq!(dev.mapped(Type::VideoOutput), 0);
    assert_eq!(dev.mapped(Type::VideoCapture), 0);
}
