/*!
Topic based publish/subscribe relay over `WebSocket`s.

Clients connect to `/bus` and exchange JSON [`BusFrame`](webrtc_pubsub_protocol::bus::BusFrame)s.
A `publish` is delivered to every connection subscribed to its topic at that moment,
the publisher included. The relay keeps no history and knows nothing about calls.
*/

pub mod config;
pub mod relay;
pub mod router;
