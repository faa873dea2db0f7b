//! In-memory repository double. One mutex guards all tables, so every
//! operation is atomic exactly like its Postgres transaction.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    invitation, Comment, CommentRepository, FeedQuery, FollowerRepository, NewComment,
    NewPost, NewUser, Post, PostId, PostRepository, PostWithMetadata, Result, Role,
    RoleRepository, SortOrder, StoreError, User, UserId, UserRepository, DEFAULT_ROLE,
};

const COMMENTS_PER_POST: usize = 10;

struct Invitation {
    digest: String,
    user_id: UserId,
    expiry: OffsetDateTime,
}

struct State {
    roles: Vec<Role>,
    users: BTreeMap<UserId, User>,
    invitations: Vec<Invitation>,
    posts: BTreeMap<PostId, Post>,
    comments: Vec<Comment>,
    // (followed, follower)
    followers: HashSet<(UserId, UserId)>,
    next_user_id: UserId,
    next_post_id: PostId,
    next_comment_id: i64,
}

impl Default for State {
    fn default() -> Self {
        let role = |id: i64, name: &str, description: &str, level: i32| Role {
            id,
            name: name.to_string(),
            description: description.to_string(),
            level,
        };
        Self {
            roles: vec![
                role(1, "user", "A user can create posts and comments", 1),
                role(2, "moderator", "A moderator can update other users posts", 2),
                role(3, "admin", "An admin can update and delete other users posts", 3),
            ],
            users: BTreeMap::new(),
            invitations: Vec::new(),
            posts: BTreeMap::new(),
            comments: Vec::new(),
            followers: HashSet::new(),
            next_user_id: 1,
            next_post_id: 1,
            next_comment_id: 1,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    user_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable backend: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get_by_id` calls that reached this store.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    /// Inserts an already active user, bypassing the invitation flow.
    pub fn seed_active_user(&self, username: &str, email: &str, role: &str) -> Result<User> {
        let mut st = self.lock();
        let role = find_role(&st, role)?;
        check_unique(&st, username, email)?;
        let id = st.next_user_id;
        st.next_user_id += 1;
        let user = User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            is_active: true,
            role,
            created_at: OffsetDateTime::now_utc(),
        };
        st.users.insert(id, user.clone());
        Ok(user)
    }

    /// Total users regardless of activation state.
    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn pending_invitations(&self) -> usize {
        self.lock().invitations.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.lock())
    }
}

fn find_role(st: &State, name: &str) -> Result<Role> {
    st.roles
        .iter()
        .find(|r| r.name == name)
        .cloned()
        .ok_or(StoreError::NotFound)
}

fn check_unique(st: &State, username: &str, email: &str) -> Result<()> {
    if st.users.values().any(|u| u.email == email) {
        return Err(StoreError::DuplicateEmail);
    }
    if st.users.values().any(|u| u.username == username) {
        return Err(StoreError::DuplicateUsername);
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let st = self.available()?;
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        st.users
            .get(&id)
            .filter(|u| u.is_active)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        let st = self.available()?;
        st.users
            .values()
            .find(|u| u.email == email && u.is_active)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        token_digest: &str,
        ttl: time::Duration,
    ) -> Result<User> {
        let mut st = self.available()?;
        let role_name = if user.role.is_empty() {
            DEFAULT_ROLE
        } else {
            user.role.as_str()
        };
        let role = find_role(&st, role_name)?;
        check_unique(&st, &user.username, &user.email)?;
        if st.invitations.iter().any(|i| i.digest == token_digest) {
            return Err(StoreError::DuplicateKey);
        }

        let id = st.next_user_id;
        st.next_user_id += 1;
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: false,
            role,
            created_at: OffsetDateTime::now_utc(),
        };
        st.users.insert(id, created.clone());
        st.invitations.push(Invitation {
            digest: token_digest.to_string(),
            user_id: id,
            expiry: OffsetDateTime::now_utc() + ttl,
        });
        Ok(created)
    }

    async fn activate(&self, plain_token: &str) -> Result<()> {
        let digest = invitation::digest(plain_token);
        let mut st = self.available()?;
        let now = OffsetDateTime::now_utc();
        let user_id = st
            .invitations
            .iter()
            .find(|i| i.digest == digest && i.expiry > now)
            .map(|i| i.user_id)
            .ok_or(StoreError::NotFound)?;
        let user = st.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.is_active = true;
        st.invitations.retain(|i| i.user_id != user_id);
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        let mut st = self.available()?;
        st.invitations.retain(|i| i.user_id != id);
        st.users.remove(&id);
        // Mirror the ON DELETE CASCADE foreign keys.
        let owned: Vec<PostId> = st
            .posts
            .values()
            .filter(|p| p.user_id == id)
            .map(|p| p.id)
            .collect();
        for post_id in owned {
            st.posts.remove(&post_id);
        }
        let State { posts, comments, .. } = &mut *st;
        comments.retain(|c| c.user_id != id && posts.contains_key(&c.post_id));
        st.followers.retain(|(followed, follower)| *followed != id && *follower != id);
        Ok(())
    }

    async fn purge_expired_invitations(&self) -> Result<u64> {
        let mut st = self.available()?;
        let now = OffsetDateTime::now_utc();
        let expired: Vec<UserId> = st
            .invitations
            .iter()
            .filter(|i| i.expiry <= now)
            .map(|i| i.user_id)
            .collect();
        let mut purged = 0;
        for id in expired {
            if st.users.get(&id).is_some_and(|u| !u.is_active) {
                st.users.remove(&id);
                purged += 1;
            }
            st.invitations.retain(|i| i.user_id != id);
        }
        Ok(purged)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<Role> {
        let st = self.available()?;
        find_role(&st, name)
    }
}

#[async_trait]
impl PostRepository for MemoryStore {
    async fn create(&self, post: NewPost) -> Result<Post> {
        let mut st = self.available()?;
        if !st.users.contains_key(&post.user_id) {
            return Err(StoreError::NotFound);
        }
        let id = st.next_post_id;
        st.next_post_id += 1;
        let now = OffsetDateTime::now_utc();
        let created = Post {
            id,
            user_id: post.user_id,
            title: post.title,
            content: post.content,
            tags: post.tags,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        st.posts.insert(id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: PostId) -> Result<Post> {
        let st = self.available()?;
        st.posts.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, post: &Post) -> Result<Post> {
        let mut st = self.available()?;
        let stored = st.posts.get_mut(&post.id).ok_or(StoreError::NotFound)?;
        if stored.version != post.version {
            return Err(StoreError::Conflict);
        }
        stored.title = post.title.clone();
        stored.content = post.content.clone();
        stored.tags = post.tags.clone();
        stored.version += 1;
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }

    async fn delete(&self, id: PostId) -> Result<()> {
        let mut st = self.available()?;
        if st.posts.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        st.comments.retain(|c| c.post_id != id);
        Ok(())
    }

    async fn feed(&self, user_id: UserId, query: &FeedQuery) -> Result<Vec<PostWithMetadata>> {
        let st = self.available()?;
        let search = query.search.to_lowercase();
        let mut items: Vec<PostWithMetadata> = st
            .posts
            .values()
            .filter(|p| p.user_id == user_id || st.followers.contains(&(p.user_id, user_id)))
            .filter(|p| {
                search.is_empty()
                    || p.title.to_lowercase().contains(&search)
                    || p.content.to_lowercase().contains(&search)
            })
            .filter(|p| query.tags.iter().all(|t| p.tags.contains(t)))
            .filter(|p| query.since.map_or(true, |s| p.created_at >= s))
            .filter(|p| query.until.map_or(true, |u| p.created_at <= u))
            .filter_map(|p| {
                let author = st.users.get(&p.user_id)?;
                let comments_count = st.comments.iter().filter(|c| c.post_id == p.id).count();
                Some(PostWithMetadata {
                    post: p.clone(),
                    username: author.username.clone(),
                    comments_count: comments_count as i64,
                })
            })
            .collect();

        items.sort_by_key(|m| (m.post.created_at, m.post.id));
        if query.sort == SortOrder::Desc {
            items.reverse();
        }
        Ok(items
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }
}

#[async_trait]
impl CommentRepository for MemoryStore {
    async fn create(&self, comment: NewComment) -> Result<Comment> {
        let mut st = self.available()?;
        if !st.posts.contains_key(&comment.post_id) {
            return Err(StoreError::NotFound);
        }
        let username = st
            .users
            .get(&comment.user_id)
            .map(|u| u.username.clone())
            .ok_or(StoreError::NotFound)?;
        let id = st.next_comment_id;
        st.next_comment_id += 1;
        let created = Comment {
            id,
            post_id: comment.post_id,
            user_id: comment.user_id,
            username,
            content: comment.content,
            created_at: OffsetDateTime::now_utc(),
        };
        st.comments.push(created.clone());
        Ok(created)
    }

    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>> {
        let st = self.available()?;
        let mut comments: Vec<Comment> = st
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| std::cmp::Reverse((c.created_at, c.id)));
        comments.truncate(COMMENTS_PER_POST);
        Ok(comments)
    }
}

#[async_trait]
impl FollowerRepository for MemoryStore {
    async fn follow(&self, follower_id: UserId, followed_id: UserId) -> Result<()> {
        let mut st = self.available()?;
        if !st.users.contains_key(&follower_id) || !st.users.contains_key(&followed_id) {
            return Err(StoreError::NotFound);
        }
        if !st.followers.insert((followed_id, follower_id)) {
            return Err(StoreError::DuplicateKey);
        }
        Ok(())
    }

    async fn unfollow(&self, follower_id: UserId, followed_id: UserId) -> Result<()> {
        let mut st = self.available()?;
        if !st.followers.remove(&(followed_id, follower_id)) {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::invitation::InvitationToken;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: String::new(),
        }
    }

    fn new_post(user_id: UserId, title: &str, tags: &[&str]) -> NewPost {
        NewPost {
            user_id,
            title: title.into(),
            content: format!("{title} body"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn invite_creates_pending_user_invisible_to_reads() {
        let store = MemoryStore::new();
        let token = InvitationToken::generate();
        let user = store
            .create_and_invite(new_user("alice", "a@x.io"), &token.digest, time::Duration::hours(1))
            .await
            .expect("invite");
        assert!(!user.is_active);
        assert_eq!(user.role.name, "user");
        assert!(matches!(UserRepository::get_by_id(&store, user.id).await, Err(StoreError::NotFound)));
        assert!(matches!(store.get_by_email("a@x.io").await, Err(StoreError::NotFound)));
        assert_eq!(store.pending_invitations(), 1);
    }

    #[tokio::test]
    async fn activation_is_single_use() {
        let store = MemoryStore::new();
        let token = InvitationToken::generate();
        let user = store
            .create_and_invite(new_user("bob", "b@x.io"), &token.digest, time::Duration::hours(1))
            .await
            .expect("invite");

        store.activate(&token.plain).await.expect("first activation");
        assert!(UserRepository::get_by_id(&store, user.id).await.expect("active").is_active);
        assert!(matches!(store.activate(&token.plain).await, Err(StoreError::NotFound)));
        assert_eq!(store.pending_invitations(), 0);
    }

    #[tokio::test]
    async fn activation_rejects_digest_and_expired_tokens() {
        let store = MemoryStore::new();
        let token = InvitationToken::generate();
        store
            .create_and_invite(new_user("carol", "c@x.io"), &token.digest, time::Duration::hours(1))
            .await
            .expect("invite");
        // The stored digest is not itself a valid token.
        assert!(matches!(store.activate(&token.digest).await, Err(StoreError::NotFound)));

        let stale = InvitationToken::generate();
        store
            .create_and_invite(new_user("dan", "d@x.io"), &stale.digest, time::Duration::seconds(-1))
            .await
            .expect("invite");
        assert!(matches!(store.activate(&stale.plain).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_one_user() {
        let store = MemoryStore::new();
        let first = InvitationToken::generate();
        store
            .create_and_invite(new_user("erin", "e@x.io"), &first.digest, time::Duration::hours(1))
            .await
            .expect("invite");

        let second = InvitationToken::generate();
        let err = store
            .create_and_invite(new_user("erin2", "e@x.io"), &second.digest, time::Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let third = InvitationToken::generate();
        let err = store
            .create_and_invite(new_user("erin", "e2@x.io"), &third.digest, time::Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername));

        assert_eq!(store.user_count(), 1);
        assert_eq!(store.pending_invitations(), 1);
    }

    #[tokio::test]
    async fn delete_removes_user_and_invitation() {
        let store = MemoryStore::new();
        let token = InvitationToken::generate();
        let user = store
            .create_and_invite(new_user("fay", "f@x.io"), &token.digest, time::Duration::hours(1))
            .await
            .expect("invite");
        UserRepository::delete(&store, user.id).await.expect("delete");
        assert_eq!(store.user_count(), 0);
        assert_eq!(store.pending_invitations(), 0);
        assert!(matches!(store.activate(&token.plain).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_pending_users() {
        let store = MemoryStore::new();
        let live = InvitationToken::generate();
        store
            .create_and_invite(new_user("gus", "g@x.io"), &live.digest, time::Duration::hours(1))
            .await
            .expect("invite");
        let dead = InvitationToken::generate();
        store
            .create_and_invite(new_user("hal", "h@x.io"), &dead.digest, time::Duration::seconds(-5))
            .await
            .expect("invite");

        assert_eq!(store.purge_expired_invitations().await.expect("purge"), 1);
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.pending_invitations(), 1);
    }

    #[tokio::test]
    async fn concurrent_stale_updates_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.seed_active_user("ivy", "i@x.io", "user").expect("seed");
        let post = PostRepository::create(&*store, new_post(owner.id, "draft", &[])).await.expect("post");

        let mut a = post.clone();
        a.title = "from a".into();
        let mut b = post.clone();
        b.title = "from b".into();

        let (sa, sb) = (store.clone(), store.clone());
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { sa.update(&a).await }),
            tokio::spawn(async move { sb.update(&b).await }),
        );
        let results = [ra.expect("join"), rb.expect("join")];

        let winners: Vec<&Post> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].version, post.version + 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::Conflict))));

        let stored = PostRepository::get_by_id(&*store, post.id).await.expect("stored");
        assert_eq!(stored.title, winners[0].title);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn update_distinguishes_missing_from_stale() {
        let store = MemoryStore::new();
        let owner = store.seed_active_user("jo", "j@x.io", "user").expect("seed");
        let post = PostRepository::create(&store, new_post(owner.id, "t", &[])).await.expect("post");

        let mut ghost = post.clone();
        ghost.id = 999;
        assert!(matches!(store.update(&ghost).await, Err(StoreError::NotFound)));

        let mut stale = post.clone();
        stale.version = 7;
        assert!(matches!(store.update(&stale).await, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn delete_post_cascades_comments() {
        let store = MemoryStore::new();
        let owner = store.seed_active_user("kim", "k@x.io", "user").expect("seed");
        let post = PostRepository::create(&store, new_post(owner.id, "t", &[])).await.expect("post");
        for i in 0..3 {
            CommentRepository::create(
                &store,
                NewComment {
                    post_id: post.id,
                    user_id: owner.id,
                    content: format!("c{i}"),
                })
                .await
                .expect("comment");
        }
        assert_eq!(store.list_by_post(post.id).await.expect("list").len(), 3);

        PostRepository::delete(&store, post.id).await.expect("delete");
        assert!(store.list_by_post(post.id).await.expect("list").is_empty());
        assert!(matches!(
            PostRepository::delete(&store, post.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn follow_edges_are_unique() {
        let store = MemoryStore::new();
        let a = store.seed_active_user("lee", "l@x.io", "user").expect("seed");
        let b = store.seed_active_user("max", "m@x.io", "user").expect("seed");

        store.follow(a.id, b.id).await.expect("follow");
        assert!(matches!(store.follow(a.id, b.id).await, Err(StoreError::DuplicateKey)));
        assert!(matches!(store.follow(a.id, 404).await, Err(StoreError::NotFound)));

        store.unfollow(a.id, b.id).await.expect("unfollow");
        assert!(matches!(store.unfollow(a.id, b.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn feed_includes_own_and_followed_posts_with_filters() {
        let store = MemoryStore::new();
        let me = store.seed_active_user("ned", "n@x.io", "user").expect("seed");
        let friend = store.seed_active_user("oli", "o@x.io", "user").expect("seed");
        let stranger = store.seed_active_user("pat", "p@x.io", "user").expect("seed");
        store.follow(me.id, friend.id).await.expect("follow");

        PostRepository::create(&store, new_post(me.id, "mine", &["rust"])).await.expect("post");
        let theirs = PostRepository::create(&store, new_post(friend.id, "Friend news", &["rust", "go"]))
            .await
            .expect("post");
        PostRepository::create(&store, new_post(stranger.id, "hidden", &["rust"])).await.expect("post");
        CommentRepository::create(
            &store,
            NewComment {
                post_id: theirs.id,
                user_id: me.id,
                content: "nice".into(),
            })
            .await
            .expect("comment");

        let all = store.feed(me.id, &FeedQuery::default()).await.expect("feed");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|m| m.post.user_id != stranger.id));

        let tagged = store
            .feed(me.id, &FeedQuery { tags: vec!["go".into()], ..Default::default() })
            .await
            .expect("feed");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].username, "oli");
        assert_eq!(tagged[0].comments_count, 1);

        let searched = store
            .feed(me.id, &FeedQuery { search: "NEWS".into(), ..Default::default() })
            .await
            .expect("feed");
        assert_eq!(searched.len(), 1);

        let paged = store
            .feed(me.id, &FeedQuery { limit: 1, offset: 1, ..Default::default() })
            .await
            .expect("feed");
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn feed_search_treats_wildcards_literally() {
        let store = MemoryStore::new();
        let me = store.seed_active_user("rae", "r@x.io", "user").expect("seed");
        PostRepository::create(&store, new_post(me.id, "50% off", &[])).await.expect("post");
        PostRepository::create(&store, new_post(me.id, "plain", &[])).await.expect("post");
        PostRepository::create(&store, new_post(me.id, "snake_case", &[])).await.expect("post");

        let percent = store
            .feed(me.id, &FeedQuery { search: "%".into(), ..Default::default() })
            .await
            .expect("feed");
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].post.title, "50% off");

        let underscore = store
            .feed(me.id, &FeedQuery { search: "_".into(), ..Default::default() })
            .await
            .expect("feed");
        assert_eq!(underscore.len(), 1);
        assert_eq!(underscore[0].post.title, "snake_case");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        let user = store.seed_active_user("quinn", "q@x.io", "user").expect("seed");
        store.set_unavailable(true);
        assert!(matches!(UserRepository::get_by_id(&store, user.id).await, Err(StoreError::Unavailable)));
        store.set_unavailable(false);
        assert!(UserRepository::get_by_id(&store, user.id).await.is_ok());
    }
}
