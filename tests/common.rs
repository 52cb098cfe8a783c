#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use revdb::{
    EntityType, FieldDef, Fields, Model, Result, Revisable, RevisionId, SaveMode, Store,
    TrashableModel, Versioned,
};

// =============================================================================
// Stores
// =============================================================================

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Store::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

/// Registers every fixture type, dependencies first.
pub fn register_all(store: &mut Store) {
    store.register::<Story>().expect("register story");
    store.register::<FancyStory>().expect("register fancy_story");
    store
        .register_trashable::<TrashableStory>()
        .expect("register trashable_story");
    store.register::<Aside>().expect("register aside");
    store.register::<Citation>().expect("register citation");
    store.register::<Tag>().expect("register tag");
    store.register::<Post>().expect("register post");
    store.register::<UniqueStory>().expect("register unique_story");
    store.register::<Article>().expect("register article");
}

pub fn memory_store() -> Store {
    let mut store = Store::open_in_memory().expect("open in-memory store");
    register_all(&mut store);
    store
}

pub fn file_store(path: &Path) -> Store {
    let mut store = Store::open(path).expect("open store");
    register_all(&mut store);
    store
}

// =============================================================================
// Fixtures
// =============================================================================

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Plain revisioned content. `summary` is cleared for every new revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Story {
    pub title: String,
    pub slug: String,
    pub body: String,
    pub summary: Option<String>,
}

impl Story {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Story {
    const TYPE_NAME: &'static str = "story";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::text("title"))
            .field(FieldDef::text("slug"))
            .field(FieldDef::text("body"))
            .field(FieldDef::text("summary").nullable())
            .clear_each_revision(&["summary"])
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("title", self.title.as_str())
            .with("slug", self.slug.as_str())
            .with("body", self.body.as_str())
            .with("summary", self.summary.clone())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            title: fields.text("title")?,
            slug: fields.text("slug")?,
            body: fields.text("body")?,
            summary: fields.opt_text("summary")?,
        })
    }

    fn before_save(&mut self) {
        self.slug = slugify(&self.title);
    }
}

pub fn story(title: &str, body: &str) -> Versioned<Story> {
    Versioned::new(Story::new(title, body))
}

/// Inherits every `Story` column; adds its own table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FancyStory {
    pub story: Story,
    pub subtitle: String,
}

impl Model for FancyStory {
    const TYPE_NAME: &'static str = "fancy_story";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .extends::<Story>()
            .field(FieldDef::text("subtitle"))
    }

    fn to_fields(&self) -> Fields {
        self.story.to_fields().with("subtitle", self.subtitle.as_str())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            story: Story::from_fields(fields)?,
            subtitle: fields.text("subtitle")?,
        })
    }

    fn before_save(&mut self) {
        self.story.before_save();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrashableStory {
    pub title: String,
}

impl Model for TrashableStory {
    const TYPE_NAME: &'static str = "trashable_story";
    const TRASHABLE: bool = true;

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME).field(FieldDef::text("title"))
    }

    fn to_fields(&self) -> Fields {
        Fields::new().with("title", self.title.as_str())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            title: fields.text("title")?,
        })
    }
}

impl TrashableModel for TrashableStory {}

pub fn trashable(title: &str) -> Versioned<TrashableStory> {
    Versioned::new(TrashableStory {
        title: title.to_string(),
    })
}

/// Auxiliary record pointing at one revision of a story.
#[derive(Debug, Clone, PartialEq)]
pub struct Aside {
    pub story: RevisionId,
    pub note: String,
}

impl Model for Aside {
    const TYPE_NAME: &'static str = "aside";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::foreign_key("story", Story::TYPE_NAME))
            .field(FieldDef::text("note"))
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("story", self.story)
            .with("note", self.note.as_str())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            story: fields.revision_id("story")?,
            note: fields.text("note")?,
        })
    }
}

/// Two foreign keys to `Story`; resolving it needs the field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub source: RevisionId,
    pub cited: Option<RevisionId>,
}

impl Model for Citation {
    const TYPE_NAME: &'static str = "citation";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::foreign_key("source", Story::TYPE_NAME))
            .field(FieldDef::foreign_key("cited", Story::TYPE_NAME).nullable())
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("source", self.source)
            .with("cited", self.cited)
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            source: fields.revision_id("source")?,
            cited: fields.opt_revision_id("cited")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
}

impl Model for Tag {
    const TYPE_NAME: &'static str = "tag";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME).field(FieldDef::text("name"))
    }

    fn to_fields(&self) -> Fields {
        Fields::new().with("name", self.name.as_str())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            name: fields.text("name")?,
        })
    }
}

pub fn saved_tag(store: &mut Store, name: &str) -> Versioned<Tag> {
    let mut tag = Versioned::new(Tag {
        name: name.to_string(),
    });
    tag.save(store, SaveMode::NewRevision).expect("save tag");
    tag
}

/// Carries a many-to-many relation `tags` to `Tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub title: String,
}

impl Model for Post {
    const TYPE_NAME: &'static str = "post";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::text("title"))
            .many_to_many("tags", Tag::TYPE_NAME)
    }

    fn to_fields(&self) -> Fields {
        Fields::new().with("title", self.title.as_str())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            title: fields.text("title")?,
        })
    }
}

/// `body` is unique among the latest revisions of all bundles; `code` is
/// unique across every row.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueStory {
    pub body: Option<String>,
    pub code: Option<String>,
}

impl Model for UniqueStory {
    const TYPE_NAME: &'static str = "unique_story";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::text("body").nullable())
            .field(FieldDef::text("code").nullable())
            .unique_per_bundle(&["body"])
            .unique_per_revision(&["code"])
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("body", self.body.clone())
            .with("code", self.code.clone())
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            body: fields.opt_text("body")?,
            code: fields.opt_text("code")?,
        })
    }
}

pub fn unique_story(body: Option<&str>) -> Versioned<UniqueStory> {
    Versioned::new(UniqueStory {
        body: body.map(str::to_string),
        code: None,
    })
}

/// Dated content: `published` drives fetch-by-date, `created` is stamped on
/// every inserted revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub published: Option<i64>,
    pub created: Option<i64>,
}

impl Model for Article {
    const TYPE_NAME: &'static str = "article";

    fn describe() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
            .field(FieldDef::text("title"))
            .field(FieldDef::timestamp("published").nullable())
            .field(FieldDef::timestamp("created").auto_now_add())
            .publication_field("published")
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("title", self.title.as_str())
            .with("published", self.published)
            .with("created", self.created)
    }

    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            title: fields.text("title")?,
            published: fields.opt_integer("published")?,
            created: fields.opt_integer("created")?,
        })
    }
}

pub fn article(title: &str, published: Option<i64>) -> Versioned<Article> {
    Versioned::new(Article {
        title: title.to_string(),
        published,
        created: None,
    })
}
