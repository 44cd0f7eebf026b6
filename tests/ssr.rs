use std::{convert::Infallible, rc::Rc};

use assert_call::{call, CallRecorder};
use async_action_cache::*;
use futures::executor::LocalPool;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    id: u32,
    title: String,
}

#[derive(Debug, Clone, Serialize)]
struct PostArgs {
    id: u32,
}

struct App {
    stores: Stores,
    visits: Store<u32>,
}

fn app() -> App {
    let visits = Store::new(0);
    let mut stores = Stores::new();
    stores.register("visits", visits.clone());
    App { stores, visits }
}

fn get_post() -> AsyncAction<PostArgs, Post> {
    AsyncAction::new(|args: PostArgs, scope: ActionScope| async move {
        call!("get_post {}", args.id);
        scope.stores::<App>().visits.update(|v| *v += 1);
        Ok::<_, Infallible>(ActionResult::success(Post {
            id: args.id,
            title: format!("post {}", args.id),
        }))
    })
}

fn render(w: &mut Watcher<PostArgs, Post>, id: u32) -> BeckonState<Post> {
    w.beckon(PostArgs { id }, BeckonOptions::default())
}

#[test]
fn server_render_hands_results_to_client() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let get_post = get_post();

    let server_app = Rc::new(app());
    let server = AsyncCache::builder(pool.spawner()).server(true).build();
    server.set_stores(server_app.clone());
    let mut w = get_post.watcher(&server, || {});
    assert!(!render(&mut w, 1).finished);
    let mut lazy = get_post.watcher(&server, || {});
    let s = lazy.beckon(
        PostArgs { id: 2 },
        BeckonOptions {
            ssr: false,
            ..BeckonOptions::default()
        },
    );
    assert_eq!(s.result.end_tag(), Some(EndTag::Dormant));

    pool.run_until(server.resolve_pending());
    cr.verify("get_post 1");
    assert_eq!(render(&mut w, 1).result.payload.unwrap().title, "post 1");
    let json = Snapshot::capture(&server, &server_app.stores)
        .unwrap()
        .to_json()
        .unwrap();
    drop((w, lazy));

    let client_app = Rc::new(app());
    let client = AsyncCache::new(pool.spawner());
    client.set_stores(client_app.clone());
    Snapshot::from_json(&json)
        .unwrap()
        .restore(&client, &client_app.stores)
        .unwrap();
    assert_eq!(client_app.visits.raw_state(), 1);

    let mut w = get_post.watcher(&client, || call!("rerender"));
    let s = render(&mut w, 1);
    assert!(s.finished);
    assert_eq!(s.result.payload.unwrap().title, "post 1");
    pool.run_until_stalled();
    cr.verify(());

    let mut w2 = get_post.watcher(&client, || call!("rerender 2"));
    assert!(!render(&mut w2, 2).finished);
    pool.run_until_stalled();
    cr.verify(["get_post 2", "rerender 2"]);
    assert_eq!(client_app.visits.raw_state(), 2);
}

#[test]
fn resolve_pending_waits_for_dependent_actions() {
    let mut cr = CallRecorder::new();
    let mut pool = LocalPool::new();
    let get_post = get_post();
    let outer_post = get_post.clone();
    let summary: AsyncAction<u32, String> = AsyncAction::new(move |id: u32, scope: ActionScope| {
        let get_post = outer_post.clone();
        async move {
            call!("summary {id}");
            let post = get_post
                .run(scope.cache(), PostArgs { id }, RunOptions::default())
                .await;
            Ok::<_, Infallible>(match post.into_result() {
                Ok(post) => ActionResult::success(post.title.to_uppercase()),
                Err(e) => ActionResult::error(e.message),
            })
        }
    });

    let server = AsyncCache::builder(pool.spawner())
        .server(true)
        .stores(app())
        .build();
    let mut w = summary.watcher(&server, || {});
    w.beckon(7, BeckonOptions::default());
    pool.run_until(server.resolve_pending());
    cr.verify(["summary 7", "get_post 7"]);

    let s = w.beckon(7, BeckonOptions::default());
    assert_eq!(s.result.payload.as_deref(), Some("POST 7"));
    let post = get_post.get_cached(&server, &PostArgs { id: 7 }, GetCachedOptions::default());
    assert!(post.finished);
}
