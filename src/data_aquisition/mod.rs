/*
 * This module provides data aquisition abilites for the application.
 * It doesn't care what it gets, just how: SNMPv3 requests and interactive SSH shells,
 * each behind a trait so tests can replay scripted devices.
 */

pub mod core;
pub mod credentials;
pub mod snmp;
pub mod ssh;
