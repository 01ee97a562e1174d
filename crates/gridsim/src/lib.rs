#![doc = include_str!("../readme.md")]

pub mod calendar;
pub mod characteristics;
pub mod config;
pub mod error;
pub mod events;
pub mod failure;
pub mod filter;
pub mod gis;
pub mod gridlet;
pub mod machine;
pub mod network;
pub mod policy;
pub mod reservation;
pub mod resource;
pub mod simulation;
pub mod user;
