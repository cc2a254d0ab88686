//! Folding ordered items into batched draws

use crate::item::{DrawContext, ItemRef, RenderPass};
use crate::quadtree::Visible;
use std::sync::Arc;

/// Two or more adjacent batchable items drawn with shared state
#[derive(Clone)]
pub struct Batch {
    members: Vec<ItemRef>,
}

impl Batch {
    pub fn members(&self) -> &[ItemRef] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Draw all members inside one batch where possible.
    ///
    /// Members that cannot batch in `ctx` right now are drawn on their own
    /// between two batch segments, keeping the member order.
    pub fn draw(&self, ctx: &mut dyn DrawContext, pass: RenderPass) {
        let mut open = false;
        for member in &self.members {
            let batchable = member
                .as_batchable()
                .filter(|b| b.is_batchable(&*ctx, pass));
            match batchable {
                Some(b) => {
                    if !open {
                        ctx.batch_begin();
                        open = true;
                    }
                    b.batch(ctx, pass);
                }
                None => {
                    if open {
                        ctx.batch_end();
                        open = false;
                    }
                    member.draw(ctx, pass);
                }
            }
        }
        if open {
            ctx.batch_end();
        }
    }

    pub fn release(&self) {
        self.members.iter().for_each(|m| m.release());
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.members.iter().map(|m| m.id()))
            .finish()
    }
}

/// One entry of a render list
#[derive(Clone)]
pub enum Drawable {
    Item(ItemRef),
    Batch(Batch),
}

impl Drawable {
    pub fn draw(&self, ctx: &mut dyn DrawContext, pass: RenderPass) {
        match self {
            Drawable::Item(item) => item.draw(ctx, pass),
            Drawable::Batch(batch) => batch.draw(ctx, pass),
        }
    }

    pub fn release(&self) {
        match self {
            Drawable::Item(item) => item.release(),
            Drawable::Batch(batch) => batch.release(),
        }
    }

    /// Items drawn by this entry, in draw order
    pub fn items(&self) -> &[ItemRef] {
        match self {
            Drawable::Item(item) => std::slice::from_ref(item),
            Drawable::Batch(batch) => batch.members(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Drawable::Batch(_))
    }
}

impl std::fmt::Debug for Drawable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Drawable::Item(item) => f.debug_tuple("Item").field(&item.id()).finish(),
            Drawable::Batch(batch) => f.debug_tuple("Batch").field(batch).finish(),
        }
    }
}

/// Build the draw entries of one pass from an ordered query result.
///
/// Runs of two or more consecutive batchable items become one [`Batch`]; a
/// lone batchable item and every non-batchable item are emitted directly.
pub fn compose(ordered: &[Visible], pass: RenderPass) -> Vec<Drawable> {
    #[cfg(feature = "profiling")]
    profiling::scope!("batch::compose");

    let mut out = Vec::new();
    let mut run: Vec<ItemRef> = Vec::new();
    for visible in ordered.iter().filter(|v| v.in_pass(pass)) {
        if visible.item.as_batchable().is_some() {
            run.push(Arc::clone(&visible.item));
        } else {
            flush(&mut run, &mut out);
            out.push(Drawable::Item(Arc::clone(&visible.item)));
        }
    }
    flush(&mut run, &mut out);
    out
}

fn flush(run: &mut Vec<ItemRef>, out: &mut Vec<Drawable>) {
    match run.len() {
        0 => {}
        1 => out.extend(run.drain(..).map(Drawable::Item)),
        _ => out.push(Drawable::Batch(Batch {
            members: std::mem::take(run),
        })),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bounds::GeoBounds;
    use crate::item::{Batchable, ItemId, MapItem, NodeSlot, Subject};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every call made on the draw context, in order
    #[derive(Default)]
    pub(crate) struct RecordingContext {
        pub log: Vec<String>,
    }

    impl DrawContext for RecordingContext {
        fn batch_begin(&mut self) {
            self.log.push("begin".into());
        }
        fn batch_end(&mut self) {
            self.log.push("end".into());
        }
    }

    pub(crate) struct Drawn {
        pub id: u64,
        pub batchable: bool,
        pub pass: RenderPass,
        pub releases: AtomicUsize,
        pub batch_in_context: AtomicBool,
        pub slot: NodeSlot,
        pub log: Mutex<Vec<RenderPass>>,
    }

    impl Drawn {
        pub(crate) fn new(id: u64, batchable: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                batchable,
                pass: RenderPass::SURFACE,
                releases: AtomicUsize::new(0),
                batch_in_context: AtomicBool::new(true),
                slot: NodeSlot::new(),
                log: Mutex::new(Vec::new()),
            })
        }
    }

    impl MapItem for Drawn {
        fn id(&self) -> ItemId {
            ItemId(self.id)
        }
        fn subject(&self) -> Subject {
            Subject::new(0.0)
        }
        fn bounds(&self) -> GeoBounds {
            GeoBounds::point(0.0, 0.0)
        }
        fn min_draw_resolution(&self) -> f64 {
            f64::MAX
        }
        fn render_pass(&self) -> RenderPass {
            self.pass
        }
        fn draw(&self, ctx: &mut dyn DrawContext, pass: RenderPass) {
            self.log.lock().unwrap().push(pass);
            let _ = ctx.draw_tilt();
        }
        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        fn as_batchable(&self) -> Option<&dyn Batchable> {
            self.batchable.then_some(self as &dyn Batchable)
        }
        fn node_slot(&self) -> &NodeSlot {
            &self.slot
        }
    }

    impl Batchable for Drawn {
        fn is_batchable(&self, _ctx: &dyn DrawContext, _pass: RenderPass) -> bool {
            self.batch_in_context.load(Ordering::SeqCst)
        }

        fn batch(&self, _ctx: &mut dyn DrawContext, pass: RenderPass) {
            self.log.lock().unwrap().push(pass);
        }
    }

    fn visible(items: &[Arc<Drawn>]) -> Vec<Visible> {
        items
            .iter()
            .map(|d| Visible {
                item: d.clone(),
                passes: d.pass,
            })
            .collect()
    }

    fn shape(drawables: &[Drawable]) -> Vec<Vec<u64>> {
        drawables
            .iter()
            .map(|d| d.items().iter().map(|i| i.id().0).collect())
            .collect()
    }

    #[test]
    fn test_single_batchable_item_is_not_wrapped() {
        let items = [Drawn::new(1, true)];
        let out = compose(&visible(&items), RenderPass::SURFACE);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_batch());
    }

    #[test]
    fn test_runs_become_batches() {
        let items = [
            Drawn::new(1, true),
            Drawn::new(2, true),
            Drawn::new(3, false),
            Drawn::new(4, true),
            Drawn::new(5, false),
            Drawn::new(6, true),
            Drawn::new(7, true),
            Drawn::new(8, true),
        ];
        let out = compose(&visible(&items), RenderPass::SURFACE);
        assert_eq!(
            shape(&out),
            vec![vec![1, 2], vec![3], vec![4], vec![5], vec![6, 7, 8]]
        );
        let batches: Vec<bool> = out.iter().map(Drawable::is_batch).collect();
        assert_eq!(batches, vec![true, false, false, false, true]);
    }

    #[test]
    fn test_other_pass_is_filtered() {
        let items = [Drawn::new(1, true), Drawn::new(2, true)];
        assert!(compose(&visible(&items), RenderPass::SPRITES).is_empty());
    }

    #[test]
    fn test_batch_draw_brackets_members() {
        let items = [Drawn::new(1, true), Drawn::new(2, true)];
        let out = compose(&visible(&items), RenderPass::SURFACE);
        let mut ctx = RecordingContext::default();
        out[0].draw(&mut ctx, RenderPass::SURFACE);
        assert_eq!(ctx.log, vec!["begin", "end"]);
        for item in &items {
            assert_eq!(*item.log.lock().unwrap(), vec![RenderPass::SURFACE]);
        }
    }

    #[test]
    fn test_member_refusing_batch_is_drawn_between_segments() {
        let items = [Drawn::new(1, true), Drawn::new(2, true), Drawn::new(3, true)];
        items[1].batch_in_context.store(false, Ordering::SeqCst);
        let out = compose(&visible(&items), RenderPass::SURFACE);
        assert_eq!(out.len(), 1);

        let mut ctx = RecordingContext::default();
        out[0].draw(&mut ctx, RenderPass::SURFACE);
        assert_eq!(ctx.log, vec!["begin", "end", "begin", "end"]);
        assert_eq!(items[1].log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_release_releases_members() {
        let items = [Drawn::new(1, true), Drawn::new(2, true), Drawn::new(3, true)];
        let out = compose(&visible(&items), RenderPass::SURFACE);
        out.iter().for_each(Drawable::release);
        for item in &items {
            assert_eq!(item.releases.load(Ordering::SeqCst), 1);
        }
    }
}
