//! Fetch streams: the push-based surface a network layer implements.
//!
//! A stream emits [`FetchEvent::Start`] once, then any number of
//! [`FetchEvent::Next`] payloads, then at most one terminal `Error` or
//! `Complete`. Events may arrive synchronously from inside `subscribe`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_primitives::{DataId, RecordMap};
use tessera_worker::CancelToken;

use crate::error::FetchError;

/// Normalized records of one response, plus ids the response invalidated.
#[derive(Debug, Clone, Default)]
pub struct ResponsePayload {
	pub records: RecordMap,
	pub invalidated_ids: Vec<DataId>,
}

impl ResponsePayload {
	pub fn new(records: RecordMap) -> Self {
		Self {
			records,
			invalidated_ids: Vec::new(),
		}
	}
}

/// Handle that cancels an in-flight fetch.
#[derive(Debug, Clone)]
pub struct NetworkSubscription {
	token: CancelToken,
}

impl NetworkSubscription {
	pub fn new() -> Self {
		Self {
			token: CancelToken::new(0),
		}
	}

	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves when the subscription is cancelled.
	pub async fn cancelled(&self) {
		self.token.cancelled().await;
	}
}

impl Default for NetworkSubscription {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug)]
pub enum FetchEvent {
	Start(NetworkSubscription),
	Next(ResponsePayload),
	Error(FetchError),
	Complete,
}

impl FetchEvent {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Error(_) | Self::Complete)
	}
}

pub type FetchObserver = Box<dyn FnMut(FetchEvent) + Send>;

/// A cold, single-subscriber stream of fetch events.
pub trait FetchStream: Send {
	fn subscribe(self: Box<Self>, observer: FetchObserver);
}

/// Stream that emits a fixed sequence of events on subscribe.
pub struct StaticFetch {
	events: Vec<FetchEvent>,
}

impl StaticFetch {
	/// Start, one payload, complete.
	pub fn ready(payload: ResponsePayload) -> Self {
		Self {
			events: vec![FetchEvent::Next(payload), FetchEvent::Complete],
		}
	}

	/// Start, then an error.
	pub fn failed(error: FetchError) -> Self {
		Self {
			events: vec![FetchEvent::Error(error)],
		}
	}
}

impl FetchStream for StaticFetch {
	fn subscribe(self: Box<Self>, mut observer: FetchObserver) {
		let subscription = NetworkSubscription::new();
		observer(FetchEvent::Start(subscription.clone()));
		for event in self.events {
			if subscription.is_cancelled() {
				break;
			}
			observer(event);
		}
	}
}

/// Creates a stream fed by hand through the returned [`FetchSink`].
///
/// Events pushed before the stream is subscribed are buffered.
pub fn fetch_channel() -> (FetchSink, ChannelFetch) {
	let channel = Arc::new(Mutex::new(Channel {
		observer: None,
		buffered: Vec::new(),
		subscription: NetworkSubscription::new(),
		closed: false,
	}));
	(
		FetchSink {
			channel: channel.clone(),
		},
		ChannelFetch { channel },
	)
}

struct Channel {
	observer: Option<FetchObserver>,
	buffered: Vec<FetchEvent>,
	subscription: NetworkSubscription,
	closed: bool,
}

/// Producer half of [`fetch_channel`].
#[derive(Clone)]
pub struct FetchSink {
	channel: Arc<Mutex<Channel>>,
}

/// Consumer half of [`fetch_channel`].
pub struct ChannelFetch {
	channel: Arc<Mutex<Channel>>,
}

impl FetchSink {
	pub fn next(&self, payload: ResponsePayload) {
		self.emit(FetchEvent::Next(payload));
	}

	pub fn error(&self, error: FetchError) {
		self.emit(FetchEvent::Error(error));
	}

	pub fn complete(&self) {
		self.emit(FetchEvent::Complete);
	}

	/// True once the consumer cancelled its subscription.
	pub fn is_cancelled(&self) -> bool {
		self.channel.lock().subscription.is_cancelled()
	}

	/// Observer runs outside the channel lock so it may push further events.
	fn emit(&self, event: FetchEvent) {
		let mut observer = {
			let mut channel = self.channel.lock();
			if channel.closed || channel.subscription.is_cancelled() {
				return;
			}
			channel.closed = event.is_terminal();
			match channel.observer.take() {
				Some(observer) => observer,
				None => {
					channel.buffered.push(event);
					return;
				}
			}
		};
		observer(event);
		park(&self.channel, observer);
	}
}

/// Hands the observer back to the channel, first delivering anything
/// buffered while it was out.
fn park(channel: &Mutex<Channel>, mut observer: FetchObserver) {
	loop {
		let buffered = {
			let mut channel = channel.lock();
			if channel.buffered.is_empty() || channel.subscription.is_cancelled() {
				channel.buffered.clear();
				channel.observer = Some(observer);
				return;
			}
			std::mem::take(&mut channel.buffered)
		};
		for event in buffered {
			observer(event);
		}
	}
}

impl FetchStream for ChannelFetch {
	fn subscribe(self: Box<Self>, mut observer: FetchObserver) {
		let subscription = self.channel.lock().subscription.clone();
		observer(FetchEvent::Start(subscription));
		park(&self.channel, observer);
	}
}

impl fmt::Debug for FetchSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let channel = self.channel.lock();
		f.debug_struct("FetchSink")
			.field("subscribed", &channel.observer.is_some())
			.field("buffered", &channel.buffered.len())
			.field("closed", &channel.closed)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn recording() -> (Arc<Mutex<Vec<String>>>, FetchObserver) {
		let log = Arc::new(Mutex::new(Vec::new()));
		let sink = log.clone();
		let observer: FetchObserver = Box::new(move |event: FetchEvent| {
			let name = match event {
				FetchEvent::Start(_) => "start",
				FetchEvent::Next(_) => "next",
				FetchEvent::Error(_) => "error",
				FetchEvent::Complete => "complete",
			};
			sink.lock().push(name.to_string());
		});
		(log, observer)
	}

	#[test]
	fn test_channel_buffers_until_subscribed() {
		let (sink, stream) = fetch_channel();
		sink.next(ResponsePayload::default());
		let (log, observer) = recording();
		Box::new(stream).subscribe(observer);
		sink.complete();
		sink.next(ResponsePayload::default());
		assert_eq!(*log.lock(), ["start", "next", "complete"]);
	}

	#[test]
	fn test_cancelled_channel_drops_events() {
		let (sink, stream) = fetch_channel();
		let captured = Arc::new(Mutex::new(None));
		let slot = captured.clone();
		Box::new(stream).subscribe(Box::new(move |event: FetchEvent| {
			if let FetchEvent::Start(subscription) = event {
				*slot.lock() = Some(subscription);
			}
		}));
		let subscription = captured.lock().take().unwrap();
		subscription.cancel();
		assert!(sink.is_cancelled());
		sink.next(ResponsePayload::default());
	}

	#[test]
	fn test_static_fetch_emits_in_order() {
		let (log, observer) = recording();
		Box::new(StaticFetch::ready(ResponsePayload::default())).subscribe(observer);
		assert_eq!(*log.lock(), ["start", "next", "complete"]);
	}
}
