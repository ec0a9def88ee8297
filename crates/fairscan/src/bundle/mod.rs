//! App bundle scanning.
//!
//! This module provides functionality to:
//! - Walk a bundle and assign every file to its owning bundle scope
//! - Treat plugin bundles (`PlugIns/*.appex`) as independent scopes
//! - Group encrypted binaries by the main executable of their scope
//!
//! # Overview
//!
//! A scan is a pipeline of three stages:
//!
//! | Stage | Type | Role |
//! |-------|------|------|
//! | walk | [`ScopedWalker`] | yields `(scope, file)` candidates |
//! | inspect | [`inspect_candidate`] | keeps files with encryption metadata |
//! | aggregate | [`ScopeBuckets`] | resolves main executables, builds the [`Report`] |
//!
//! [`crate::BundleScanner`] wires the stages together.
//!
//! `PlugIns` is a boundary directly under a scope root and under its
//! `Contents` directory, so `Contents/PlugIns/Ext.appex` of a macOS app is
//! its own scope too. Every such plugin needs its own `Info.plist` once it
//! contains a match, otherwise the scan fails with [`crate::Error::Manifest`].

pub mod aggregate;
pub mod manifest;
pub mod walker;

pub use aggregate::{EncryptedFile, Report, ScopeBuckets};
pub use manifest::{bundle_relative, parse_main_executable, InfoPlistReader, ManifestReader};
pub use walker::{inspect_candidate, Candidate, Match, ScopedWalker, PLUGINS_DIR};
