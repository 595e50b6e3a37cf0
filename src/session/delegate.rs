//! Outward notification contract
//!
//! Every hook has a no-op default, so an observer only implements the events
//! it cares about.

use super::message::Message;
use super::state::ConnectionResponse;

/// Observer of session lifecycle and delivery events
pub trait SessionDelegate: Send {
    /// Broker answered a connection attempt
    fn did_receive_connection_response(&mut self, _response: ConnectionResponse) {}

    /// Connection closed, gracefully or not
    fn did_disconnect(&mut self) {}

    /// A publish was acknowledged (or written, for QoS 0)
    fn did_publish(&mut self, _message: &Message) {}

    /// An application message arrived from the broker
    fn did_receive_message(&mut self, _message: &Message) {}

    fn did_subscribe(&mut self, _message: &Message) {}

    fn did_unsubscribe(&mut self, _message: &Message) {}

    /// A message exhausted its configured retry attempts
    fn did_fail_delivery(&mut self, _message: &Message) {}
}

/// Delegate that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl SessionDelegate for NoopDelegate {}

impl<D: SessionDelegate + ?Sized> SessionDelegate for Box<D> {
    fn did_receive_connection_response(&mut self, response: ConnectionResponse) {
        (**self).did_receive_connection_response(response)
    }

    fn did_disconnect(&mut self) {
        (**self).did_disconnect()
    }

    fn did_publish(&mut self, message: &Message) {
        (**self).did_publish(message)
    }

    fn did_receive_message(&mut self, message: &Message) {
        (**self).did_receive_message(message)
    }

    fn did_subscribe(&mut self, message: &Message) {
        (**self).did_subscribe(message)
    }

    fn did_unsubscribe(&mut self, message: &Message) {
        (**self).did_unsubscribe(message)
    }

    fn did_fail_delivery(&mut self, message: &Message) {
        (**self).did_fail_delivery(message)
    }
}
