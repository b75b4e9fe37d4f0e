use std::time::Duration;

use crate::buffer::Type;
use crate::device::Format;

/// Number of buffers requested per endpoint unless configured otherwise
pub const DEFAULT_BUFFERS: u32 = 2;

/// Number of loop iterations a session runs unless configured otherwise
pub const DEFAULT_ITERATIONS: usize = 50;

/// Settings for one side of a streaming session
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use v4l_loopback::buffer::Type;
/// use v4l_loopback::config::EndpointConfig;
///
/// let cfg = EndpointConfig::new("/dev/video0", Type::VideoCapture)
///     .buffers(4)
///     .timeout(Duration::from_millis(500));
/// assert_eq!(cfg.buffers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// device node to open
    pub name: String,
    /// buffer type, fixed for the lifetime of the endpoint
    pub typ: Type,
    /// buffers to request, the device may grant fewer
    pub buffers: u32,
    /// format to negotiate, only applied to output endpoints
    pub format: Option<Format>,
    /// upper bound for blocking dequeues, `None` waits forever
    pub timeout: Option<Duration>,
}

impl EndpointConfig {
    pub fn new<S: Into<String>>(name: S, typ: Type) -> Self {
        let format = match typ {
            Type::VideoOutput => Some(Format::default()),
            Type::VideoCapture => None,
        };

        EndpointConfig {
            name: name.into(),
            typ,
            buffers: DEFAULT_BUFFERS,
            format,
            timeout: None,
        }
    }

    pub fn buffers(mut self, count: u32) -> Self {
        self.buffers = count;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Settings for a source/sink pair streaming through one loopback device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub source: EndpointConfig,
    pub sink: EndpointConfig,
    pub iterations: usize,
}

impl SessionConfig {
    /// Source and sink both open the same loopback node
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        SessionConfig {
            source: EndpointConfig::new(name.clone(), Type::VideoOutput),
            sink: EndpointConfig::new(name, Type::VideoCapture),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn buffers(mut self, count: u32) -> Self {
        self.source.buffers = count;
        self.sink.buffers = count;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.source.format = Some(format);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.source.timeout = Some(timeout);
        self.sink.timeout = Some(timeout);
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}
