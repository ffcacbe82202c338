// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Prometheus metrics for the containers in this crate. Registered once,
//! process-wide, via `prometheus::default_registry()`.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts};

lazy_static! {
    /// Histogram of block sizes passed to `update`, bucketed across
    /// a representative range of payload sizes.
    pub static ref BLOCK_SIZE_BYTES: Box<Histogram> = {
        let hist = Box::new(
            Histogram::with_opts(
                HistogramOpts::new("block_size", "Histogram of block size").buckets(vec![
                    32., 64., 128., 256., 512., 1024., 2048., 4096., 8192., 16384., 32768., 65536.,
                ]),
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(hist.clone())
            .expect("registering the block_size metric with the registry must succeed");
        hist
    };

    /// Reserve calls, labeled by container kind (`"memory"`, `"block_file"`,
    /// `"raw_access"`, …).
    pub static ref CONTAINER_RESERVE_TOTAL: Box<IntCounterVec> = {
        let counter = Box::new(
            IntCounterVec::new(
                Opts::new("container_reserve_total", "Number of reserve() calls"),
                &["container"],
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering container_reserve_total must succeed");
        counter
    };

    /// Remove calls, labeled by container kind.
    pub static ref CONTAINER_REMOVE_TOTAL: Box<IntCounterVec> = {
        let counter = Box::new(
            IntCounterVec::new(
                Opts::new("container_remove_total", "Number of remove() calls"),
                &["container"],
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering container_remove_total must succeed");
        counter
    };

    /// Dirty entries flushed back to the wrapped container by
    /// [`crate::buffered::BufferedContainer`].
    pub static ref BUFFERED_FLUSH_TOTAL: Box<IntCounterVec> = {
        let counter = Box::new(
            IntCounterVec::new(
                Opts::new("buffered_flush_total", "Number of entries flushed by the buffered decorator"),
                &["mode"],
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering buffered_flush_total must succeed");
        counter
    };

    /// Cache probe outcomes on [`crate::buffered::BufferedContainer::get`].
    pub static ref BUFFERED_CACHE_PROBE_TOTAL: Box<IntCounterVec> = {
        let counter = Box::new(
            IntCounterVec::new(
                Opts::new("buffered_cache_probe_total", "Cache hits/misses on the buffered decorator"),
                &["outcome"],
            )
            .unwrap(),
        );
        prometheus::default_registry()
            .register(counter.clone())
            .expect("registering buffered_cache_probe_total must succeed");
        counter
    };
}
