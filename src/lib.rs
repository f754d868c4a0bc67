// COREPLUG -- LOAD-DRIVEN CPU HOTPLUG CONTROLLER
// LIBRARY SURFACE: EVERYTHING BELOW IS TESTABLE WITHOUT ROOT VIA SimPlatform.

pub mod config;
pub mod cores;
pub mod display;
pub mod engine;
pub mod event;
pub mod history;
pub mod hotplug;
pub mod platform;
pub mod scheduler;
pub mod suspend;
pub mod tuning;
