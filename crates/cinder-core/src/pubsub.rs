//! Publish/subscribe hub.
//!
//! Maps channel names to their subscriber lists. Subscribers are held
//! as weak references keyed by connection id, so a closed connection
//! never pins its session state; dead entries are pruned on publish.
//! Acknowledgements and deliveries are pushed through each connection's
//! reply sink, outside the request/response cycle.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use cinder_protocol::Reply;
use dashmap::DashMap;
use tracing::debug;

use crate::conn::Connection;

struct Subscriber {
    id: u64,
    conn: Weak<dyn Connection>,
}

/// Channel registry shared by every connection task.
#[derive(Default)]
pub struct Hub {
    channels: DashMap<String, Vec<Subscriber>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the connection to each named channel, acknowledging
    /// every one through the reply sink.
    pub fn subscribe(&self, conn: &Arc<dyn Connection>, channels: &[Bytes]) -> Reply {
        for raw in channels {
            let channel = String::from_utf8_lossy(raw).into_owned();
            conn.subscribe(&channel);

            let mut subs = self.channels.entry(channel.clone()).or_default();
            if !subs.iter().any(|s| s.id == conn.id()) {
                subs.push(Subscriber {
                    id: conn.id(),
                    conn: Arc::downgrade(conn),
                });
            }
            drop(subs);

            conn.send(&Reply::Array(vec![
                Reply::Bulk(Bytes::from_static(b"subscribe")),
                Reply::Bulk(Bytes::from(channel)),
                Reply::Integer(conn.subs_count() as i64),
            ]));
        }
        Reply::Empty
    }

    /// Unsubscribes from the named channels, or from everything when
    /// none are named, acknowledging each through the reply sink.
    pub fn unsubscribe(&self, conn: &Arc<dyn Connection>, channels: &[Bytes]) -> Reply {
        let names: Vec<String> = if channels.is_empty() {
            conn.channels()
        } else {
            channels
                .iter()
                .map(|raw| String::from_utf8_lossy(raw).into_owned())
                .collect()
        };

        if names.is_empty() {
            // nothing to leave; a lone ack keeps the client's protocol
            // state machine moving
            conn.send(&Reply::Array(vec![
                Reply::Bulk(Bytes::from_static(b"unsubscribe")),
                Reply::Null,
                Reply::Integer(0),
            ]));
            return Reply::Empty;
        }

        for channel in names {
            self.drop_subscriber(&channel, conn.id());
            conn.unsubscribe(&channel);
            conn.send(&Reply::Array(vec![
                Reply::Bulk(Bytes::from_static(b"unsubscribe")),
                Reply::Bulk(Bytes::from(channel)),
                Reply::Integer(conn.subs_count() as i64),
            ]));
        }
        Reply::Empty
    }

    /// Delivers a message to every live subscriber of the channel and
    /// returns how many received it.
    pub fn publish(&self, channel_raw: &Bytes, payload: &Bytes) -> Reply {
        let channel = String::from_utf8_lossy(channel_raw).into_owned();
        let message = Reply::Array(vec![
            Reply::Bulk(Bytes::from_static(b"message")),
            Reply::Bulk(channel_raw.clone()),
            Reply::Bulk(payload.clone()),
        ]);

        let mut delivered = 0i64;
        if let Some(mut subs) = self.channels.get_mut(&channel) {
            subs.retain(|sub| match sub.conn.upgrade() {
                Some(conn) => {
                    conn.send(&message);
                    delivered += 1;
                    true
                }
                None => false, // connection gone, drop its entry
            });
        }
        debug!(channel, delivered, "published message");
        Reply::Integer(delivered)
    }

    /// Removes a closing connection from every channel it joined.
    pub fn unsubscribe_all(&self, conn: &Arc<dyn Connection>) {
        for channel in conn.channels() {
            self.drop_subscriber(&channel, conn.id());
            conn.unsubscribe(&channel);
        }
    }

    fn drop_subscriber(&self, channel: &str, id: u64) {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                drop(subs);
                self.channels.remove_if(channel, |_, v| v.is_empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::VirtualConnection;

    fn conn() -> Arc<VirtualConnection> {
        Arc::new(VirtualConnection::new())
    }

    fn as_dyn(c: &Arc<VirtualConnection>) -> Arc<dyn Connection> {
        Arc::clone(c) as Arc<dyn Connection>
    }

    #[test]
    fn subscribe_ack_and_delivery() {
        let hub = Hub::new();
        let c = conn();
        hub.subscribe(&as_dyn(&c), &[Bytes::from("news")]);

        let acks = c.take_sent();
        assert_eq!(acks.len(), 1);
        assert_eq!(
            acks[0],
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("subscribe")),
                Reply::Bulk(Bytes::from("news")),
                Reply::Integer(1),
            ])
        );

        let count = hub.publish(&Bytes::from("news"), &Bytes::from("hi"));
        assert_eq!(count, Reply::Integer(1));
        let msgs = c.take_sent();
        assert_eq!(
            msgs[0],
            Reply::Array(vec![
                Reply::Bulk(Bytes::from("message")),
                Reply::Bulk(Bytes::from("news")),
                Reply::Bulk(Bytes::from("hi")),
            ])
        );
    }

    #[test]
    fn publish_to_empty_channel_reaches_nobody() {
        let hub = Hub::new();
        assert_eq!(
            hub.publish(&Bytes::from("void"), &Bytes::from("x")),
            Reply::Integer(0)
        );
    }

    #[test]
    fn duplicate_subscribe_delivers_once() {
        let hub = Hub::new();
        let c = conn();
        hub.subscribe(&as_dyn(&c), &[Bytes::from("ch")]);
        hub.subscribe(&as_dyn(&c), &[Bytes::from("ch")]);
        c.take_sent();

        assert_eq!(
            hub.publish(&Bytes::from("ch"), &Bytes::from("m")),
            Reply::Integer(1)
        );
        assert_eq!(c.take_sent().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = Hub::new();
        let c = conn();
        hub.subscribe(&as_dyn(&c), &[Bytes::from("a"), Bytes::from("b")]);
        hub.unsubscribe(&as_dyn(&c), &[Bytes::from("a")]);
        c.take_sent();

        assert_eq!(
            hub.publish(&Bytes::from("a"), &Bytes::from("m")),
            Reply::Integer(0)
        );
        assert_eq!(
            hub.publish(&Bytes::from("b"), &Bytes::from("m")),
            Reply::Integer(1)
        );
    }

    #[test]
    fn bare_unsubscribe_leaves_everything() {
        let hub = Hub::new();
        let c = conn();
        hub.subscribe(&as_dyn(&c), &[Bytes::from("a"), Bytes::from("b")]);
        hub.unsubscribe(&as_dyn(&c), &[]);
        assert_eq!(c.subs_count(), 0);
        assert_eq!(
            hub.publish(&Bytes::from("b"), &Bytes::from("m")),
            Reply::Integer(0)
        );
    }

    #[test]
    fn dropped_connection_is_pruned_on_publish() {
        let hub = Hub::new();
        let c = conn();
        hub.subscribe(&as_dyn(&c), &[Bytes::from("ch")]);
        drop(c);
        assert_eq!(
            hub.publish(&Bytes::from("ch"), &Bytes::from("m")),
            Reply::Integer(0)
        );
    }

    #[test]
    fn two_subscribers_both_receive() {
        let hub = Hub::new();
        let c1 = conn();
        let c2 = conn();
        hub.subscribe(&as_dyn(&c1), &[Bytes::from("ch")]);
        hub.subscribe(&as_dyn(&c2), &[Bytes::from("ch")]);
        c1.take_sent();
        c2.take_sent();

        assert_eq!(
            hub.publish(&Bytes::from("ch"), &Bytes::from("m")),
            Reply::Integer(2)
        );
        assert_eq!(c1.take_sent().len(), 1);
        assert_eq!(c2.take_sent().len(), 1);
    }
}
