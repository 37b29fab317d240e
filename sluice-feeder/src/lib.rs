//! Feeder is the source side of sluice: it reads raw text records, stamps
//! their arrival time, and publishes them to the pipeline server in batches,
//! together with the progress signals the watermark tracker needs.
//!
//! The feeder deliberately does not parse payloads. Classification is the
//! server's job, and a feeder that rejected bad lines up front would starve
//! the dead-letter path of exactly the records it exists for.
//!
//! Why stamp arrival time at the feeder and not at the server?
//!
//! The arrival time doubles as the default event time for payloads that
//! carry none. Stamping at read time keeps that default as close to the
//! source as possible; a batch delayed on the wire should not shift its
//! records into a later window.
//!
//! How does the watermark advance during a file replay?
//!
//! While batches flow, the server advances the watermark from the observed
//! batch minima on its own. The feeder only has one thing the server cannot
//! infer: the end of input. After the last batch it reports a progress floor
//! of `i64::MAX` ("nothing more will arrive") and requests a drain, which
//! fires and closes every remaining window.
//!
//! With multiple feeder tasks over one file set, the end-of-input signal
//! must wait for all of them. One task reporting `i64::MAX` early would
//! make every record still in flight from its siblings too late by
//! definition. So individual feeders only publish; the launcher joins them
//! all and then sends the final progress and drain once.

pub mod feeder;
