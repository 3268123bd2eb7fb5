//! Extraction of a [`FeedRecord`] from RSS 2.0, RSS 1.0 and Atom documents.
//!
//! Every field is read through a fallback chain across the iTunes, Atom,
//! Media RSS, content module and Podcasting 2.0 namespaces. The first
//! non-empty candidate wins and is normalized by one of the functions in
//! [`super::sanitize`] or [`crate::util`].

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use super::fetcher::FetchError;
use super::sanitize::{category_key, parse_date, parse_duration, parse_number};
use super::types::{
    EpisodeRecord, EpisodeType, FeedRecord, FundingLink, MediaType, Owner, PodcastCategory,
    Transcript,
};
use super::xml::{ns, parse_document, Element};
use crate::util::{content_hash, first_non_empty, is_http_url, plain_text, safe_html, url_extension};

/// Mis-cased iTunes namespace some publishers emit, and its canonical form.
const ITUNES_DTD_VARIANT: &[u8] = b"http://www.itunes.com/DTDs/Podcast-1.0.dtd";
const ITUNES_DTD: &[u8] = b"http://www.itunes.com/dtds/podcast-1.0.dtd";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "svg"];

/// Parses a feed document into a [`FeedRecord`] without cadence fields.
///
/// # Errors
///
/// - [`FetchError::XmlParse`] - The document is not well-formed XML
/// - [`FetchError::NoFeedData`] - No RSS channel or Atom feed element
/// - [`FetchError::NoItems`] - No item has a playable media URL
pub fn parse_feed(bytes: &[u8], feed_url: &str) -> Result<FeedRecord, FetchError> {
    let bytes = normalize_itunes_namespace(bytes);
    let document = parse_document(&bytes).map_err(|issues| FetchError::XmlParse { issues })?;

    for warning in &document.warnings {
        tracing::debug!(feed = %feed_url, issue = %warning, "Recoverable XML issue");
    }

    let root = &document.root;
    let (channel, entries) = locate_channel(root).ok_or(FetchError::NoFeedData)?;

    let mut feed = read_channel(channel);
    feed.feed_url = first_non_empty([
        channel.child_text(ns::ITUNES, "new-feed-url"),
        atom_link(channel, "self"),
    ])
    .filter(|u| is_http_url(u))
    .unwrap_or_else(|| feed_url.to_string());
    feed.feed_key = content_hash(&feed.feed_url);

    let channel_authors = authors(channel);
    let mut seen = HashSet::new();
    let mut dropped = 0usize;

    for entry in entries {
        let Some(episode) = read_item(entry, &channel_authors) else {
            dropped += 1;
            continue;
        };
        if !seen.insert(episode.key.clone()) {
            tracing::debug!(feed = %feed_url, key = %episode.key, "Duplicate media URL, keeping first");
            continue;
        }
        feed.items.push(episode);
    }

    if dropped > 0 {
        tracing::debug!(feed = %feed_url, dropped, "Items without playable media skipped");
    }
    if feed.items.is_empty() {
        return Err(FetchError::NoItems);
    }

    feed.refresh_derived();
    Ok(feed)
}

fn normalize_itunes_namespace(bytes: &[u8]) -> Cow<'_, [u8]> {
    let Some(first) = find_bytes(bytes, ITUNES_DTD_VARIANT) else {
        return Cow::Borrowed(bytes);
    };

    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    let mut next = Some(first);
    while let Some(pos) = next {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(ITUNES_DTD);
        rest = &rest[pos + ITUNES_DTD_VARIANT.len()..];
        next = find_bytes(rest, ITUNES_DTD_VARIANT);
    }
    out.extend_from_slice(rest);
    Cow::Owned(out)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Finds the channel-level element and the item elements for each dialect.
fn locate_channel(root: &Element) -> Option<(&Element, Vec<&Element>)> {
    if root.is(ns::ATOM, "feed") {
        return Some((root, root.children(ns::ATOM, "entry").collect()));
    }

    let channel = if root.is(ns::NONE, "rss") || root.is(ns::RDF, "RDF") {
        root.child(ns::NONE, "channel")?
    } else {
        return None;
    };

    let mut items: Vec<&Element> = channel.children(ns::NONE, "item").collect();
    if items.is_empty() {
        // RSS 1.0 keeps items beside the channel.
        items = root.children(ns::NONE, "item").collect();
    }
    Some((channel, items))
}

// ============================================================================
// Channel
// ============================================================================

fn read_channel(channel: &Element) -> FeedRecord {
    let authors = authors(channel);

    let owner = channel
        .child(ns::ITUNES, "owner")
        .map(|owner| Owner {
            name: plain_text(owner.child_text(ns::ITUNES, "name").unwrap_or_default()),
            email: plain_text(owner.child_text(ns::ITUNES, "email").unwrap_or_default()),
        })
        .unwrap_or_default();

    let image = first_non_empty([
        channel.child(ns::ITUNES, "image").and_then(|i| i.attr("href")),
        channel
            .child(ns::NONE, "image")
            .and_then(|i| i.child_text(ns::NONE, "url")),
    ]);

    FeedRecord {
        title: plain_text(&title(channel)),
        description: safe_html(&description(channel).unwrap_or_default()),
        link: first_non_empty(
            channel
                .children(ns::NONE, "link")
                .map(Element::text)
                .chain(std::iter::once(atom_link(channel, "alternate"))),
        )
        .unwrap_or_default(),
        image,
        copyright: plain_text(
            &first_non_empty([
                channel.child_text(ns::NONE, "copyright"),
                channel.child_text(ns::ATOM, "rights"),
            ])
            .unwrap_or_default(),
        ),
        author: authors.first().cloned().unwrap_or_default(),
        owner,
        podcast_categories: podcast_categories(channel),
        funding: channel
            .children(ns::PODCAST, "funding")
            .filter_map(|f| {
                let url = f.attr("url")?;
                Some(FundingLink {
                    url: url.to_string(),
                    label: plain_text(f.text().unwrap_or_default()),
                })
            })
            .collect(),
        ..FeedRecord::default()
    }
}

fn podcast_categories(channel: &Element) -> BTreeMap<String, PodcastCategory> {
    let mut categories = BTreeMap::new();
    for category in channel.children(ns::ITUNES, "category") {
        let Some(label) = category.attr("text").map(plain_text).filter(|l| !l.is_empty()) else {
            continue;
        };
        let subcategories = category
            .children(ns::ITUNES, "category")
            .filter_map(|sub| sub.attr("text"))
            .map(plain_text)
            .filter(|s| !s.is_empty())
            .collect();
        categories
            .entry(category_key(&label))
            .or_insert(PodcastCategory {
                label,
                subcategories,
            });
    }
    categories
}

// ============================================================================
// Items
// ============================================================================

struct Enclosure<'a> {
    url: &'a str,
    mime: Option<&'a str>,
}

impl Enclosure<'_> {
    fn is_media(&self) -> bool {
        self.mime
            .map(|m| {
                let m = m.to_ascii_lowercase();
                m.contains("audio") || m.contains("video")
            })
            .unwrap_or(false)
    }

    fn is_image(&self) -> bool {
        self.mime
            .map(|m| m.to_ascii_lowercase().starts_with("image"))
            .unwrap_or(false)
    }
}

fn read_item(item: &Element, channel_authors: &[String]) -> Option<EpisodeRecord> {
    let enclosures = enclosures(item);
    let media = resolve_media(item, &enclosures)?;
    let media_url = media.url.to_string();

    let media_type = url_extension(&media_url)
        .and_then(|ext| MediaType::from_extension(&ext))
        .or_else(|| media.mime.and_then(MediaType::from_mime))
        .unwrap_or_default();

    let title = plain_text(&title(item));

    let mut item_authors = authors(item);
    if item_authors.is_empty() {
        item_authors = channel_authors.to_vec();
    }

    let published = first_non_empty([
        item.child_text(ns::NONE, "pubDate"),
        item.child_text(ns::ATOM, "published"),
        item.child_text(ns::ATOM, "updated"),
    ])
    .and_then(|raw| parse_date(&raw))
    .unwrap_or_default();

    let guid = item.child(ns::NONE, "guid");
    let permalink = guid
        .filter(|g| !g.attr("isPermaLink").is_some_and(|p| p.eq_ignore_ascii_case("false")))
        .and_then(Element::text)
        .filter(|g| is_http_url(g));
    let link = first_non_empty([
        atom_link(item, "alternate"),
        item.child_text(ns::NONE, "link"),
        permalink,
        Some(media_url.as_str()),
    ])
    .unwrap_or_default();

    let episode_id = first_non_empty([
        item.child_text(ns::ATOM, "id"),
        guid.and_then(Element::text),
    ])
    .unwrap_or_else(|| content_hash(&title));

    let season = item.child_text(ns::ITUNES, "season").and_then(parse_number);
    let episode = item
        .child_text(ns::ITUNES, "episode")
        .and_then(parse_number)
        .map(|number| match season {
            Some(season) => format!("{season}-{number}"),
            None => number.to_string(),
        });

    Some(EpisodeRecord {
        key: content_hash(&media_url),
        title,
        description: safe_html(&description(item).unwrap_or_default()),
        author: item_authors.into_iter().next().unwrap_or_default(),
        published,
        link,
        media_type,
        featured_image: featured_image(item, &enclosures),
        episode,
        season,
        categories: item_categories(item),
        episode_id,
        duration_secs: item.child_text(ns::ITUNES, "duration").and_then(parse_duration),
        episode_type: item
            .child_text(ns::ITUNES, "episodeType")
            .map(EpisodeType::parse)
            .unwrap_or_default(),
        transcripts: item
            .children(ns::PODCAST, "transcript")
            .filter_map(|t| {
                Some(Transcript {
                    url: t.attr("url")?.to_string(),
                    mime_type: t.attr("type")?.to_string(),
                    language: t.attr("language").map(str::to_string),
                    rel: t.attr("rel").map(str::to_string),
                })
            })
            .collect(),
        chapters: item
            .children(ns::PODCAST, "chapters")
            .filter_map(|c| Some((c.attr("url")?.to_string(), c.attr("type")?.to_string())))
            .collect(),
        media_url,
        ..EpisodeRecord::default()
    })
}

/// RSS enclosures followed by Atom `rel="enclosure"` links.
fn enclosures(item: &Element) -> Vec<Enclosure<'_>> {
    let rss = item.children(ns::NONE, "enclosure").filter_map(|e| {
        Some(Enclosure {
            url: e.attr("url")?,
            mime: e.attr("type"),
        })
    });
    let atom = item
        .children(ns::ATOM, "link")
        .filter(|l| l.attr("rel") == Some("enclosure"))
        .filter_map(|l| {
            Some(Enclosure {
                url: l.attr("href")?,
                mime: l.attr("type"),
            })
        });
    rss.chain(atom).filter(|e| is_http_url(e.url)).collect()
}

fn media_contents(parent: &Element) -> impl Iterator<Item = Enclosure<'_>> {
    parent.children(ns::MEDIA, "content").filter_map(|c| {
        Some(Enclosure {
            url: c.attr("url")?,
            mime: c.attr("type"),
        })
    })
}

fn resolve_media<'a>(item: &'a Element, enclosures: &[Enclosure<'a>]) -> Option<Enclosure<'a>> {
    let grouped = item
        .children(ns::MEDIA, "group")
        .flat_map(media_contents)
        .find(|c| c.is_media() && is_http_url(c.url));
    if grouped.is_some() {
        return grouped;
    }

    let direct = media_contents(item).find(|c| c.is_media() && is_http_url(c.url));
    if direct.is_some() {
        return direct;
    }

    let typed = enclosures.iter().find(|e| e.is_media()).or_else(|| {
        enclosures.iter().find(|e| {
            url_extension(e.url)
                .and_then(|ext| MediaType::from_extension(&ext))
                .is_some()
        })
    })?;
    Some(Enclosure {
        url: typed.url,
        mime: typed.mime,
    })
}

fn featured_image(item: &Element, enclosures: &[Enclosure<'_>]) -> Option<String> {
    let itunes = item.child(ns::ITUNES, "image").and_then(|i| i.attr("href"));
    let enclosure = enclosures.iter().find(|e| e.is_image()).map(|e| e.url);
    let media = item
        .children(ns::MEDIA, "content")
        .chain(item.children(ns::MEDIA, "group").flat_map(|g| g.children(ns::MEDIA, "content")))
        .filter(|c| c.attr("medium").is_some_and(|m| m.contains("image")))
        .find_map(|c| c.attr("url"));

    [itunes, enclosure, media]
        .into_iter()
        .flatten()
        .find(|url| looks_like_image(url))
        .map(str::to_string)
}

fn looks_like_image(url: &str) -> bool {
    is_http_url(url)
        && url_extension(url).map_or(true, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn item_categories(item: &Element) -> BTreeMap<String, String> {
    let rss = item
        .children(ns::NONE, "category")
        .filter_map(Element::text);
    let atom = item
        .children(ns::ATOM, "category")
        .filter_map(|c| c.attr("term"));

    let mut categories = BTreeMap::new();
    for label in rss.chain(atom).map(plain_text) {
        let key = category_key(&label);
        if !key.is_empty() {
            categories.entry(key).or_insert(label);
        }
    }
    categories
}

// ============================================================================
// Shared chains
// ============================================================================

fn title(el: &Element) -> String {
    first_non_empty([
        el.child_text(ns::NONE, "title"),
        el.child(ns::ATOM, "title").and_then(body_text).as_deref(),
        el.child_text(ns::ITUNES, "title"),
    ])
    .unwrap_or_default()
}

fn description(el: &Element) -> Option<String> {
    first_non_empty([
        el.child(ns::ATOM, "content").and_then(body_text),
        el.child_text(ns::CONTENT, "encoded").map(str::to_string),
        el.child_text(ns::NONE, "description").map(str::to_string),
        el.child(ns::ATOM, "summary").and_then(body_text),
        el.child_text(ns::ITUNES, "summary").map(str::to_string),
        el.child_text(ns::ITUNES, "subtitle").map(str::to_string),
    ])
}

/// Text of an Atom text construct; `type="xhtml"` bodies arrive as elements.
fn body_text(el: &Element) -> Option<String> {
    if el.children.is_empty() {
        el.text().map(str::to_string)
    } else {
        Some(el.deep_text()).filter(|t| !t.is_empty())
    }
}

/// Unique non-empty iTunes authors, then Atom author names.
fn authors(el: &Element) -> Vec<String> {
    let itunes = el.children(ns::ITUNES, "author").filter_map(Element::text);
    let atom = el
        .children(ns::ATOM, "author")
        .filter_map(|a| a.child_text(ns::ATOM, "name"));

    let mut out: Vec<String> = Vec::new();
    for name in itunes.chain(atom).map(plain_text) {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// `href` of the first Atom link with `rel` (a missing `rel` means alternate).
fn atom_link<'a>(el: &'a Element, rel: &str) -> Option<&'a str> {
    el.children(ns::ATOM, "link")
        .filter(|l| l.attr("rel").unwrap_or("alternate") == rel)
        .find_map(|l| l.attr("href"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FEED_URL: &str = "https://example.com/feed.xml";

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:media="http://search.yahoo.com/mrss/"
     xmlns:podcast="https://podcastindex.org/namespace/1.0">
<channel>
  <title>Example &amp; Friends</title>
  <link>https://example.com/</link>
  <description>Plain description</description>
  <itunes:summary>iTunes summary</itunes:summary>
  <itunes:author>Jane Host</itunes:author>
  <itunes:image href="https://example.com/cover.jpg"/>
  <itunes:owner><itunes:name>Jane</itunes:name><itunes:email>jane@example.com</itunes:email></itunes:owner>
  <itunes:category text="Society &amp; Culture"><itunes:category text="Documentary"/></itunes:category>
  <podcast:funding url="https://example.com/donate">Support us</podcast:funding>
  <copyright>2024 Example</copyright>
  {items}
</channel>
</rss>"#
        )
    }

    #[test]
    fn test_channel_fields() {
        let xml = rss(r#"<item><title>One</title><enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg" length="1"/></item>"#);
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();

        assert_eq!(feed.title, "Example & Friends");
        assert_eq!(feed.link, "https://example.com/");
        assert_eq!(feed.description, "Plain description");
        assert_eq!(feed.image.as_deref(), Some("https://example.com/cover.jpg"));
        assert_eq!(feed.author, "Jane Host");
        assert_eq!(feed.owner.email, "jane@example.com");
        assert_eq!(feed.copyright, "2024 Example");
        assert_eq!(feed.feed_key, content_hash(FEED_URL));

        let category = &feed.podcast_categories["society&culture"];
        assert_eq!(category.label, "Society & Culture");
        assert_eq!(category.subcategories, vec!["Documentary".to_string()]);
        assert_eq!(
            feed.funding,
            vec![FundingLink {
                url: "https://example.com/donate".into(),
                label: "Support us".into()
            }]
        );
    }

    #[test]
    fn test_item_fields() {
        let xml = rss(
            r#"<item>
  <title><![CDATA[Episode <b>1</b>]]></title>
  <description>Short</description>
  <content:encoded><![CDATA[<p>Long</p><script>alert(1)</script>]]></content:encoded>
  <pubDate>Tue, 10 Jun 2003 04:00:00 -0500</pubDate>
  <guid isPermaLink="false">ep-1</guid>
  <enclosure url="https://cdn.example.com/ep1.mp3?x=1" type="audio/mpeg" length="1"/>
  <itunes:duration>1:02:03</itunes:duration>
  <itunes:season>2</itunes:season>
  <itunes:episode>5</itunes:episode>
  <itunes:episodeType>bonus</itunes:episodeType>
  <itunes:image href="https://cdn.example.com/ep1.png"/>
  <category>Tech News</category>
  <podcast:transcript url="https://example.com/ep1.vtt" type="text/vtt" language="en"/>
  <podcast:transcript url="https://example.com/no-type.srt"/>
  <podcast:chapters url="https://example.com/ep1.json" type="application/json+chapters"/>
</item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        let item = &feed.items[0];

        assert_eq!(item.title, "Episode 1");
        assert_eq!(item.description, "<p>Long</p>");
        assert_eq!(item.media_url, "https://cdn.example.com/ep1.mp3?x=1");
        assert_eq!(item.key, content_hash("https://cdn.example.com/ep1.mp3?x=1"));
        assert_eq!(item.media_type, MediaType::Audio);
        assert_eq!(item.published.timestamp, 1_055_235_600);
        assert_eq!(item.published.offset_secs, -18_000);
        assert_eq!(item.episode_id, "ep-1");
        // Non-permalink guid falls through to the media URL.
        assert_eq!(item.link, "https://cdn.example.com/ep1.mp3?x=1");
        assert_eq!(item.author, "Jane Host");
        assert_eq!(item.duration_secs, Some(3723));
        assert_eq!(item.season, Some(2));
        assert_eq!(item.episode.as_deref(), Some("2-5"));
        assert_eq!(item.episode_type, EpisodeType::Bonus);
        assert_eq!(item.featured_image.as_deref(), Some("https://cdn.example.com/ep1.png"));
        assert_eq!(item.categories.get("technews").map(String::as_str), Some("Tech News"));
        assert_eq!(item.transcripts.len(), 1);
        assert_eq!(item.transcripts[0].language.as_deref(), Some("en"));
        assert_eq!(item.chapters.len(), 1);

        assert_eq!(feed.seasons, vec![2]);
        assert_eq!(feed.total, 1);
    }

    #[test]
    fn test_media_chain_prefers_media_group() {
        let xml = rss(
            r#"<item>
  <title>Video</title>
  <enclosure url="https://cdn.example.com/fallback.mp3" type="audio/mpeg"/>
  <media:group>
    <media:content url="https://cdn.example.com/thumb.jpg" type="image/jpeg" medium="image"/>
    <media:content url="https://cdn.example.com/show.mp4" type="video/mp4"/>
  </media:group>
</item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        let item = &feed.items[0];
        assert_eq!(item.media_url, "https://cdn.example.com/show.mp4");
        assert_eq!(item.media_type, MediaType::Video);
        assert_eq!(item.featured_image.as_deref(), Some("https://cdn.example.com/thumb.jpg"));
    }

    #[test]
    fn test_untyped_enclosure_with_media_extension() {
        let xml = rss(
            r#"<item><title>Untyped</title>
  <enclosure url="https://cdn.example.com/notes.pdf"/>
  <enclosure url="https://cdn.example.com/show.M4A"/>
</item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items[0].media_url, "https://cdn.example.com/show.M4A");
        assert_eq!(feed.items[0].media_type, MediaType::Audio);
    }

    #[test]
    fn test_items_without_media_are_dropped() {
        let xml = rss(
            r#"<item><title>Blog post</title><link>https://example.com/post</link></item>
<item><title>Audio</title><enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.total, 1);
        assert_eq!(feed.items[0].title, "Audio");
    }

    #[test]
    fn test_duplicate_media_keeps_first() {
        let xml = rss(
            r#"<item><title>First</title><enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>
<item><title>Second</title><enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "First");
    }

    #[test]
    fn test_missing_ids_fall_back_to_title_hash() {
        let xml = rss(
            r#"<item><title>Same</title><enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items[0].episode_id, content_hash("Same"));
    }

    #[test]
    fn test_zero_items_is_error() {
        let xml = rss("");
        assert!(matches!(parse_feed(xml.as_bytes(), FEED_URL), Err(FetchError::NoItems)));
    }

    #[test]
    fn test_no_channel_is_no_feed_data() {
        let xml = r#"<?xml version="1.0"?><html><body>Not a feed</body></html>"#;
        assert!(matches!(
            parse_feed(xml.as_bytes(), FEED_URL),
            Err(FetchError::NoFeedData)
        ));
    }

    #[test]
    fn test_malformed_xml_reports_issues() {
        match parse_feed(b"<rss><channel><title>x</rss>", FEED_URL) {
            Err(FetchError::XmlParse { issues }) => assert!(!issues.is_empty()),
            other => panic!("Expected XmlParse, got {:?}", other),
        }
    }

    #[test]
    fn test_miscased_itunes_namespace_is_normalized() {
        let xml = r#"<rss xmlns:itunes="http://www.itunes.com/DTDs/Podcast-1.0.dtd"><channel>
<title>Old</title>
<item><title>A</title><itunes:duration>90</itunes:duration>
<enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>
</channel></rss>"#;
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items[0].duration_secs, Some(90));
    }

    #[test]
    fn test_atom_feed() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Cast</title>
  <link href="https://atom.example.com/"/>
  <author><name>Ann</name></author>
  <entry>
    <title>Atom One</title>
    <id>urn:uuid:1</id>
    <published>2003-06-10T11:00:00+02:00</published>
    <link rel="alternate" href="https://atom.example.com/1"/>
    <link rel="enclosure" href="https://cdn.example.com/1.ogg" type="audio/ogg"/>
    <summary>Summary text</summary>
    <category term="Science"/>
  </entry>
</feed>"#;
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.title, "Atom Cast");
        assert_eq!(feed.link, "https://atom.example.com/");
        assert_eq!(feed.author, "Ann");

        let item = &feed.items[0];
        assert_eq!(item.episode_id, "urn:uuid:1");
        assert_eq!(item.link, "https://atom.example.com/1");
        assert_eq!(item.media_url, "https://cdn.example.com/1.ogg");
        assert_eq!(item.description, "Summary text");
        assert_eq!(item.author, "Ann");
        assert_eq!(item.published.offset_secs, 7200);
        assert!(item.categories.contains_key("science"));
    }

    #[test]
    fn test_self_link_becomes_feed_url() {
        let xml = r#"<rss xmlns:atom="http://www.w3.org/2005/Atom"><channel>
<atom:link rel="self" type="application/rss+xml" href="https://feeds.example.com/show"/>
<item><title>A</title><enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/></item>
</channel></rss>"#;
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.feed_url, "https://feeds.example.com/show");
        assert_eq!(feed.feed_key, content_hash("https://feeds.example.com/show"));
    }

    #[test]
    fn test_rss1_items_beside_channel() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel><title>RDF Cast</title></channel>
  <item><title>R1</title><enclosure url="https://cdn.example.com/r1.mp3" type="audio/mpeg"/></item>
</rdf:RDF>"#;
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.title, "RDF Cast");
        assert_eq!(feed.items.len(), 1);
    }

    #[test]
    fn test_non_image_featured_candidates_rejected() {
        let xml = rss(
            r#"<item><title>A</title>
  <itunes:image href="https://cdn.example.com/not-an-image.mp3"/>
  <enclosure url="https://cdn.example.com/a.mp3" type="audio/mpeg"/>
</item>"#,
        );
        let feed = parse_feed(xml.as_bytes(), FEED_URL).unwrap();
        assert_eq!(feed.items[0].featured_image, None);
    }
}
