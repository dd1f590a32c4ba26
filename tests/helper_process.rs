/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end tests with renderers in helper processes

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use webnode::engine::page::{CRASH_URL, PLUGIN_CRASH_URL};
use webnode::engine::process::ProcessBackend;
use webnode::{NodeError, NodeOptions, NodeState, PageContext, PluginDescriptor, PluginRegistry, Scene};

const TIMEOUT: Duration = Duration::from_secs(10);

fn scene() -> Scene {
    let registry = PluginRegistry::new();
    registry
        .load(PluginDescriptor::new("webnode", env!("CARGO_BIN_EXE_webnode")))
        .unwrap();
    let backend = ProcessBackend::new().with_shutdown_grace(Duration::from_secs(5));
    Scene::new(registry, Box::new(backend))
}

#[test]
fn test_bridge_call_across_processes() {
    let mut scene = scene();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let node = scene.create_node(NodeOptions::new("cef", 64, 32)).unwrap();

    let sink = Rc::clone(&calls);
    node.add_js_callback("load", move |data: String, _: &mut PageContext| sink.borrow_mut().push(data))
        .unwrap();
    node.load_url("data:text/html,<script>bridge.send('load', 'ready')</script>");

    assert!(scene.pump_until(TIMEOUT, |s| {
        s.node("cef").is_some_and(|n| n.last_status() == Some(200))
    }));
    assert_eq!(*calls.borrow(), vec!["ready".to_string()]);
    assert!(scene.node("cef").unwrap().painted());

    scene.remove_node("cef").unwrap();
    assert_eq!(scene.registry().live_handles(), 0);
    scene.cleanup().unwrap();
}

#[test]
fn test_helper_exit_is_a_renderer_crash() {
    let mut scene = scene();
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let node = scene.create_node(NodeOptions::new("cef", 16, 16)).unwrap();

    let sink = Rc::clone(&reasons);
    node.on_renderer_crash()
        .subscribe(move |crash| sink.borrow_mut().push(crash.reason.clone()));
    node.load_url(CRASH_URL);

    assert!(scene.pump_until(TIMEOUT, |s| {
        s.node("cef").is_some_and(|n| n.state() == NodeState::RendererCrashed)
    }));
    assert_eq!(reasons.borrow().len(), 1);
    assert!(reasons.borrow()[0].contains('3'));

    scene.remove_node("cef").unwrap();
    assert_eq!(scene.registry().live_handles(), 0);
}

#[test]
fn test_plugin_crash_from_helper() {
    let mut scene = scene();
    let fired = Rc::new(RefCell::new(0));
    for id in ["a", "b"] {
        let node = scene.create_node(NodeOptions::new(id, 16, 16)).unwrap();
        let counter = Rc::clone(&fired);
        node.on_plugin_crash().subscribe(move |_| *counter.borrow_mut() += 1);
    }

    scene.node_mut("a").unwrap().load_url(PLUGIN_CRASH_URL);
    assert!(scene.pump_until(TIMEOUT, |s| s.registry().crash_count() == 1));

    assert_eq!(*fired.borrow(), 2);
    assert_eq!(scene.node("a").unwrap().state(), NodeState::PluginCrashed);
    assert_eq!(scene.node("b").unwrap().state(), NodeState::PluginCrashed);
}

#[test]
fn test_missing_engine_binary() {
    let registry = PluginRegistry::new();
    registry
        .load(PluginDescriptor::new("engine", "/definitely/not/an/engine"))
        .unwrap();
    let mut scene = Scene::new(registry, Box::new(ProcessBackend::new()));

    let result = scene.create_node(NodeOptions::new("cef", 16, 16));
    assert!(matches!(result, Err(NodeError::Engine(_))));
    assert_eq!(scene.registry().live_handles(), 0);
}
